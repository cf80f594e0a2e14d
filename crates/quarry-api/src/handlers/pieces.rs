//! /pieces/:id handler — size and location of one stored piece.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use quarry_services::{PieceStore, StoreError};

use super::ApiState;

#[derive(Serialize)]
pub struct PieceResponse {
    pub id: String,
    pub size: u64,
    pub path: String,
}

pub async fn handle_piece(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<PieceResponse>, (StatusCode, String)> {
    let status = |e: StoreError| match e {
        StoreError::InvalidId(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
        StoreError::Io { .. } => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let path = state.store.locate(&id).map_err(status)?;
    let size = state.store.size(&id).map_err(status)?;

    Ok(Json(PieceResponse {
        id,
        size,
        path: path.display().to_string(),
    }))
}

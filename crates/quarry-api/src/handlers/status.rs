//! /status and /daemon/shutdown handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use quarry_services::{PieceStore, StatsSnapshot};

use super::{internal, ApiState};

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub listen_port: u16,
    pub retrievals: StatsSnapshot,
    pub pieces: PiecesInfo,
    pub ledger_entries: u64,
}

#[derive(Serialize)]
pub struct PiecesInfo {
    pub stored: usize,
    pub bytes: u64,
    pub open_readers: usize,
}

pub async fn handle_status(
    State(state): State<ApiState>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let store = state.store.clone();
    let ledger = state.ledger.clone();
    let (stored, bytes, ledger_entries) = tokio::task::spawn_blocking(move || {
        ledger
            .count()
            .map(|entries| (store.count(), store.total_bytes(), entries))
    })
    .await
    .map_err(internal)?
    .map_err(internal)?;

    Ok(Json(StatusResponse {
        listen_port: state.listen_port,
        retrievals: state.stats.snapshot(),
        pieces: PiecesInfo {
            stored,
            bytes,
            open_readers: state.store.open_readers(),
        },
        ledger_entries,
    }))
}

// ── /daemon/shutdown ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown_tx.send(());

    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}

//! /allocations handler — recent ledger entries.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use quarry_services::LedgerEntry;

use super::{internal, ApiState};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct AllocationsQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct AllocationsResponse {
    /// Entries in the ledger overall.
    pub total: u64,
    /// Newest first.
    pub allocations: Vec<LedgerEntry>,
}

pub async fn handle_allocations(
    State(state): State<ApiState>,
    Query(query): Query<AllocationsQuery>,
) -> Result<Json<AllocationsResponse>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let ledger = state.ledger.clone();
    let (total, allocations) = tokio::task::spawn_blocking(move || {
        let total = ledger.count()?;
        Ok::<_, quarry_services::LedgerError>((total, ledger.recent(limit)?))
    })
    .await
    .map_err(internal)?
    .map_err(internal)?;

    Ok(Json(AllocationsResponse { total, allocations }))
}

//! HTTP API handlers — exposes node state as JSON.

pub mod allocations;
pub mod pieces;
pub mod status;

use axum::http::StatusCode;

use quarry_services::{DiskPieceStore, RetrievalStats, SqliteLedger};

pub use allocations::handle_allocations;
pub use pieces::handle_piece;
pub use status::{handle_shutdown, handle_status};

#[derive(Clone)]
pub struct ApiState {
    pub stats: RetrievalStats,
    pub store: DiskPieceStore,
    pub ledger: SqliteLedger,
    /// Port the retrieval listener actually bound.
    pub listen_port: u16,
    /// Shutdown broadcast sender — signals graceful daemon shutdown.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

use quarry_core::{ErrorKind, ErrorReport};

use crate::ledger::LedgerError;
use crate::piece_store::StoreError;
use crate::transport::TransportError;

/// Why a retrieval session ended without a summary. Every variant is fatal.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("piece {0} not found")]
    NotFound(String),

    #[error("allocation rejected: {0}")]
    Authentication(String),

    #[error("allocation could not be recorded: {0}")]
    Persistence(#[source] LedgerError),

    #[error("transport: {0}")]
    Transport(#[source] TransportError),

    #[error("storage: {0}")]
    Storage(String),

    #[error("retrieval cancelled")]
    Cancelled,
}

impl RetrievalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RetrievalError::Protocol(_) => ErrorKind::Protocol,
            RetrievalError::NotFound(_) => ErrorKind::NotFound,
            RetrievalError::Authentication(_) => ErrorKind::Authentication,
            RetrievalError::Persistence(_) => ErrorKind::Persistence,
            RetrievalError::Transport(_) => ErrorKind::Transport,
            RetrievalError::Storage(_) => ErrorKind::Storage,
            RetrievalError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// What the client is told. Persistence and storage details stay local.
    pub fn report(&self) -> ErrorReport {
        let message = match self {
            RetrievalError::Persistence(_) => "allocation could not be recorded".to_string(),
            RetrievalError::Storage(_) => "piece could not be read".to_string(),
            other => other.to_string(),
        };
        ErrorReport {
            kind: self.kind(),
            message,
        }
    }
}

impl From<TransportError> for RetrievalError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Malformed(wire) => RetrievalError::Protocol(wire.to_string()),
            other => RetrievalError::Transport(other),
        }
    }
}

impl From<StoreError> for RetrievalError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => RetrievalError::NotFound(id),
            StoreError::InvalidId(_) => RetrievalError::Protocol(e.to_string()),
            StoreError::Io { .. } => RetrievalError::Storage(e.to_string()),
        }
    }
}

impl From<LedgerError> for RetrievalError {
    fn from(e: LedgerError) -> Self {
        RetrievalError::Persistence(e)
    }
}

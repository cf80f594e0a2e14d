//! Session observers. The session reports what it does here instead of
//! logging or counting on its own.

use std::sync::Arc;

use quarry_core::{AllocationData, PieceDescriptor, RetrievalSummary};

use crate::error::RetrievalError;

/// Hooks invoked by a retrieval session. All default to no-ops.
pub trait RetrievalObserver: Send + Sync {
    fn on_start(&self, _session: &str, _descriptor: &PieceDescriptor, _target: u64) {}

    fn on_allocation(&self, _session: &str, _data: &AllocationData, _credited: u64) {}

    fn on_keep_alive(&self, _session: &str) {}

    fn on_chunk(&self, _session: &str, _bytes: u64, _retrieved: u64) {}

    fn on_complete(&self, _session: &str, _summary: &RetrievalSummary) {}

    fn on_error(&self, _session: &str, _error: &RetrievalError) {}
}

/// Discards every event.
pub struct NoopObserver;

impl RetrievalObserver for NoopObserver {}

/// Forwards events to `tracing`.
pub struct TracingObserver;

impl RetrievalObserver for TracingObserver {
    fn on_start(&self, session: &str, descriptor: &PieceDescriptor, target: u64) {
        tracing::info!(
            session,
            piece = %descriptor.id,
            offset = descriptor.offset,
            target,
            "retrieval started"
        );
    }

    fn on_allocation(&self, session: &str, data: &AllocationData, credited: u64) {
        tracing::debug!(
            session,
            renter = hex::encode(&data.renter[..8]),
            serial = data.serial,
            credited,
            "allocation accepted"
        );
    }

    fn on_keep_alive(&self, session: &str) {
        tracing::trace!(session, "keep-alive");
    }

    fn on_chunk(&self, session: &str, bytes: u64, retrieved: u64) {
        tracing::trace!(session, bytes, retrieved, "chunk sent");
    }

    fn on_complete(&self, session: &str, summary: &RetrievalSummary) {
        tracing::info!(
            session,
            piece = %summary.piece_id,
            retrieved = summary.retrieved,
            allocated = summary.allocated,
            partial = summary.is_partial(),
            "retrieval complete"
        );
    }

    fn on_error(&self, session: &str, error: &RetrievalError) {
        tracing::warn!(session, kind = ?error.kind(), error = %error, "retrieval failed");
    }
}

/// Fan-out to several observers, in registration order.
#[derive(Default, Clone)]
pub struct Observers {
    inner: Vec<Arc<dyn RetrievalObserver>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn RetrievalObserver>) -> Self {
        self.inner.push(observer);
        self
    }
}

impl RetrievalObserver for Observers {
    fn on_start(&self, session: &str, descriptor: &PieceDescriptor, target: u64) {
        self.inner.iter().for_each(|o| o.on_start(session, descriptor, target));
    }

    fn on_allocation(&self, session: &str, data: &AllocationData, credited: u64) {
        self.inner.iter().for_each(|o| o.on_allocation(session, data, credited));
    }

    fn on_keep_alive(&self, session: &str) {
        self.inner.iter().for_each(|o| o.on_keep_alive(session));
    }

    fn on_chunk(&self, session: &str, bytes: u64, retrieved: u64) {
        self.inner.iter().for_each(|o| o.on_chunk(session, bytes, retrieved));
    }

    fn on_complete(&self, session: &str, summary: &RetrievalSummary) {
        self.inner.iter().for_each(|o| o.on_complete(session, summary));
    }

    fn on_error(&self, session: &str, error: &RetrievalError) {
        self.inner.iter().for_each(|o| o.on_error(session, error));
    }
}

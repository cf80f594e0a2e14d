//! Retrieval stats — daemon-wide counters fed by the session observer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

use quarry_core::{AllocationData, PieceDescriptor, RetrievalSummary};

use crate::error::RetrievalError;
use crate::observer::RetrievalObserver;

/// A session currently in flight.
#[derive(Debug, Clone)]
pub struct ActiveRetrieval {
    pub piece_id: String,
    pub target: u64,
    pub retrieved: u64,
    pub started_at: Instant,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    partial: AtomicU64,
    failed: AtomicU64,
    bytes_served: AtomicU64,
    credit_allocated: AtomicU64,
    allocations: AtomicU64,
}

/// Shared between every session and the HTTP API. Cheap to clone.
#[derive(Clone, Default)]
pub struct RetrievalStats {
    active: Arc<DashMap<String, ActiveRetrieval>>,
    counters: Arc<Counters>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActiveInfo {
    pub session: String,
    pub piece_id: String,
    pub target: u64,
    pub retrieved: u64,
    pub elapsed_secs: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub active: Vec<ActiveInfo>,
    pub completed: u64,
    /// Completed sessions whose piece ran out before the target.
    pub partial: u64,
    pub failed: u64,
    pub bytes_served: u64,
    pub credit_allocated: u64,
    pub allocations: u64,
}

impl RetrievalStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut active: Vec<ActiveInfo> = self
            .active
            .iter()
            .map(|e| ActiveInfo {
                session: e.key().clone(),
                piece_id: e.value().piece_id.clone(),
                target: e.value().target,
                retrieved: e.value().retrieved,
                elapsed_secs: e.value().started_at.elapsed().as_secs(),
            })
            .collect();
        active.sort_by(|a, b| a.session.cmp(&b.session));

        let c = &self.counters;
        StatsSnapshot {
            active,
            completed: c.completed.load(Ordering::Relaxed),
            partial: c.partial.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            bytes_served: c.bytes_served.load(Ordering::Relaxed),
            credit_allocated: c.credit_allocated.load(Ordering::Relaxed),
            allocations: c.allocations.load(Ordering::Relaxed),
        }
    }
}

impl RetrievalObserver for RetrievalStats {
    fn on_start(&self, session: &str, descriptor: &PieceDescriptor, target: u64) {
        self.active.insert(
            session.to_string(),
            ActiveRetrieval {
                piece_id: descriptor.id.clone(),
                target,
                retrieved: 0,
                started_at: Instant::now(),
            },
        );
    }

    fn on_allocation(&self, _session: &str, _data: &AllocationData, credited: u64) {
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);
        self.counters
            .credit_allocated
            .fetch_add(credited, Ordering::Relaxed);
    }

    fn on_chunk(&self, session: &str, bytes: u64, retrieved: u64) {
        self.counters.bytes_served.fetch_add(bytes, Ordering::Relaxed);
        if let Some(mut entry) = self.active.get_mut(session) {
            entry.retrieved = retrieved;
        }
    }

    fn on_complete(&self, session: &str, summary: &RetrievalSummary) {
        self.active.remove(session);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        if summary.is_partial() {
            self.counters.partial.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_error(&self, session: &str, _error: &RetrievalError) {
        self.active.remove(session);
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }
}

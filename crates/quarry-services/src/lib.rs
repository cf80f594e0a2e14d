//! quarry-services — the retrieval engine and the collaborators it runs against.

pub mod client;
pub mod error;
pub mod flow;
pub mod ledger;
pub mod observer;
pub mod piece_store;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;
pub mod verifier;
pub mod writer;

pub use client::{ClientError, RetrievalClient, Retrieved};
pub use error::RetrievalError;
pub use flow::{FlowController, FlowLimits};
pub use ledger::{AllocationLedger, LedgerEntry, LedgerError, MemoryLedger, SqliteLedger};
pub use observer::{NoopObserver, Observers, RetrievalObserver, TracingObserver};
pub use piece_store::{DiskPieceStore, MemoryPieceStore, PieceReader, PieceStore, StoreError};
pub use server::{serve_connection, RetrievalServer};
pub use session::{
    CancelSignal, RetrievalContext, RetrievalLimits, RetrievalSession, SessionState,
};
pub use stats::{RetrievalStats, StatsSnapshot};
pub use transport::{
    FrameReader, FrameWriter, MessageSource, ResponseSink, ServerFrame, TransportError,
};
pub use verifier::{AllocationVerifier, Ed25519Verifier};
pub use writer::StreamWriter;

//! quarry-core — shared types, wire format, configuration, and signature
//! primitives. All other Quarry crates depend on this one.

pub mod config;
pub mod crypto;
pub mod message;
pub mod wire;

pub use message::{
    AllocationData, AllocationMessage, ClientMessage, ErrorKind, ErrorReport, PieceDescriptor,
    RetrievalSummary,
};

//! Retrieval protocol messages.
//!
//! Client → server: one `PieceDescriptor`, then any number of
//! `AllocationMessage`s. Server → client: raw data, then a terminal
//! `RetrievalSummary` or `ErrorReport`.

use serde::{Deserialize, Serialize};

use crate::wire::{FrameKind, WireError, SIZE_TO_END};

/// Which piece to read and which byte range of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceDescriptor {
    pub id: String,
    /// Bytes to read, or `SIZE_TO_END` (-1) for "until the end of the piece".
    pub size: i64,
    pub offset: u64,
}

impl PieceDescriptor {
    /// Descriptor for the whole remainder of a piece from `offset`.
    pub fn to_end(id: impl Into<String>, offset: u64) -> Self {
        Self {
            id: id.into(),
            size: SIZE_TO_END,
            offset,
        }
    }
}

/// The signed part of a bandwidth allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationData {
    /// Ed25519 public key of the renter paying for the bandwidth.
    pub renter: [u8; 32],
    /// Piece the credit is granted for.
    pub piece_id: String,
    /// Monotonic per-renter counter; makes otherwise identical grants distinct.
    pub serial: u64,
    /// Credit in bytes. Negative values are normalized by the server.
    pub amount: i64,
}

/// A bandwidth allocation frame.
///
/// `data == None` is a keep-alive: valid on the wire, no credit granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationMessage {
    /// Ed25519 signature over `crypto::allocation_digest(data)`.
    #[serde(default)]
    pub signature: Vec<u8>,
    #[serde(default)]
    pub data: Option<AllocationData>,
}

impl AllocationMessage {
    pub fn keep_alive() -> Self {
        Self {
            signature: Vec::new(),
            data: None,
        }
    }
}

/// Any message a client may send on a retrieval stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Descriptor(PieceDescriptor),
    Allocation(AllocationMessage),
}

impl ClientMessage {
    pub fn kind(&self) -> FrameKind {
        match self {
            ClientMessage::Descriptor(_) => FrameKind::Descriptor,
            ClientMessage::Allocation(_) => FrameKind::Allocation,
        }
    }

    /// JSON payload for this message's frame.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let encoded = match self {
            ClientMessage::Descriptor(d) => serde_json::to_vec(d),
            ClientMessage::Allocation(a) => serde_json::to_vec(a),
        };
        encoded.map_err(|e| WireError::Malformed {
            kind: self.kind(),
            reason: e.to_string(),
        })
    }

    pub fn decode(kind: FrameKind, payload: &[u8]) -> Result<Self, WireError> {
        let malformed = |e: serde_json::Error| WireError::Malformed {
            kind,
            reason: e.to_string(),
        };
        match kind {
            FrameKind::Descriptor => serde_json::from_slice(payload)
                .map(ClientMessage::Descriptor)
                .map_err(malformed),
            FrameKind::Allocation => serde_json::from_slice(payload)
                .map(ClientMessage::Allocation)
                .map_err(malformed),
            other => Err(WireError::UnexpectedKind(other)),
        }
    }
}

/// Totals reported when a retrieval ends successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalSummary {
    pub piece_id: String,
    /// Bytes transmitted to the client.
    pub retrieved: u64,
    /// Sum of accepted (normalized) credit, spent or not.
    pub allocated: u64,
    /// Length the session aimed for; `retrieved < target` means the piece ran out.
    pub target: u64,
}

impl RetrievalSummary {
    pub fn is_partial(&self) -> bool {
        self.retrieved < self.target
    }
}

/// Failure class reported to the client in an Error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Protocol,
    NotFound,
    Authentication,
    Persistence,
    Transport,
    Storage,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

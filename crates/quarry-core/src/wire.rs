//! Quarry wire format — framing for the `Retrieve` stream.
//!
//! Every message on a retrieval connection is a fixed 8-byte header followed
//! by `length` bytes of payload. Control frames (descriptor, allocation,
//! close, error) carry JSON; data frames carry raw piece bytes.
//!
//! The header is #[repr(C, packed)] with zerocopy derives, so encoding and
//! decoding are allocation-free and need no unsafe code. The length field is
//! stored as explicit little-endian bytes so the layout does not depend on
//! the host.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Frame Header ─────────────────────────────────────────────────────────────

/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// One of the `FrameKind` discriminants.
    pub kind: u8,

    /// Wire format version. Currently 0x01.
    pub version: u8,

    /// Reserved, must be zero.
    pub flags: u8,

    /// Reserved, must be zero.
    pub reserved: u8,

    /// Payload length, little-endian. At most `MAX_PAYLOAD`.
    pub length: [u8; 4],
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; 8]);

impl FrameHeader {
    pub fn new(kind: FrameKind, length: usize) -> Result<Self, WireError> {
        if length > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(length));
        }
        Ok(Self {
            kind: kind.into(),
            version: FRAME_VERSION,
            flags: 0,
            reserved: 0,
            length: (length as u32).to_le_bytes(),
        })
    }

    /// Decode and validate a header read off the wire.
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<(FrameKind, usize), WireError> {
        let header = FrameHeader::read_from(&bytes[..]).ok_or(WireError::Truncated)?;
        if header.version != FRAME_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }
        if header.flags != 0 || header.reserved != 0 {
            return Err(WireError::ReservedFlagsSet(header.flags | header.reserved));
        }
        let kind = FrameKind::try_from(header.kind)?;
        let length = u32::from_le_bytes(header.length) as usize;
        if length > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(length));
        }
        Ok((kind, length))
    }
}

// ── Frame Kind ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Client → server, first frame only. JSON `PieceDescriptor`.
    Descriptor = 0x01,

    /// Client → server. JSON `AllocationMessage`.
    Allocation = 0x02,

    /// Server → client. Raw piece bytes, in order.
    Data = 0x10,

    /// Server → client, terminal. JSON `RetrievalSummary`.
    Close = 0x11,

    /// Server → client, terminal. JSON `ErrorReport`.
    Error = 0x12,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(FrameKind::Descriptor),
            0x02 => Ok(FrameKind::Allocation),
            0x10 => Ok(FrameKind::Data),
            0x11 => Ok(FrameKind::Close),
            0x12 => Ok(FrameKind::Error),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<FrameKind> for u8 {
    fn from(k: FrameKind) -> u8 {
        k as u8
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Current frame format version.
pub const FRAME_VERSION: u8 = 0x01;

/// Header length in bytes.
pub const HEADER_LEN: usize = 8;

/// Maximum payload size in bytes.
/// Larger data must be split by the sender into multiple frames.
pub const MAX_PAYLOAD: usize = 65535;

/// Credit substituted for a negative allocation amount.
pub const DEFAULT_ALLOCATION: u64 = 32 * 1024;

/// Sentinel descriptor size meaning "until the end of the stored piece".
pub const SIZE_TO_END: i64 = -1;

/// Default TCP port for the retrieval listener.
pub const DEFAULT_LISTEN_PORT: u16 = 7777;

/// Default port for the local HTTP API.
pub const DEFAULT_API_PORT: u16 = 7778;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("unknown frame version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("truncated frame header")]
    Truncated,

    #[error("malformed {kind:?} payload: {reason}")]
    Malformed { kind: FrameKind, reason: String },

    #[error("unexpected {0:?} frame")]
    UnexpectedKind(FrameKind),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

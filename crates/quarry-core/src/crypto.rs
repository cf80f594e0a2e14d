//! Cryptographic primitives for Quarry.
//!
//! Provides two things:
//!   1. BLAKE3 allocation digests — the signed message and the ledger key
//!   2. Ed25519 allocation signatures — renters sign, storage nodes verify
//!
//! The storage node never holds renter private keys. `RenterKeypair` exists
//! for clients and tests; ed25519-dalek zeroizes the secret on drop.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use crate::message::{AllocationData, AllocationMessage};

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Domain separator for allocation signatures. Part of the protocol.
const ALLOCATION_DOMAIN: &[u8] = b"quarry.allocation.v1";

/// Digest a renter signs to grant an allocation.
///
///   digest = BLAKE3("quarry.allocation.v1" || json(data))
pub fn allocation_digest(data: &AllocationData) -> Result<[u8; 32], CryptoError> {
    let body = serde_json::to_vec(data).map_err(|e| CryptoError::Encode(e.to_string()))?;
    let mut h = blake3::Hasher::new();
    h.update(ALLOCATION_DOMAIN);
    h.update(&body);
    Ok(*h.finalize().as_bytes())
}

// ── Keypair ───────────────────────────────────────────────────────────────────

/// A renter's Ed25519 signing key.
pub struct RenterKeypair {
    signing: SigningKey,
}

impl RenterKeypair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct from stored secret bytes.
    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&secret),
        }
    }

    /// Parse a hex-encoded 32-byte secret, as written by `quarry-ctl keygen`.
    pub fn from_hex(hex_secret: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_secret.trim()).map_err(|_| CryptoError::BadKeyEncoding)?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::BadKeyEncoding)?;
        Ok(Self::from_secret(secret))
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    pub fn public(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// Sign `amount` bytes of credit for `piece_id`.
    pub fn allocate(
        &self,
        piece_id: &str,
        serial: u64,
        amount: i64,
    ) -> Result<AllocationMessage, CryptoError> {
        let data = AllocationData {
            renter: self.public(),
            piece_id: piece_id.to_string(),
            serial,
            amount,
        };
        let digest = allocation_digest(&data)?;
        let signature = self.signing.sign(&digest);
        Ok(AllocationMessage {
            signature: signature.to_bytes().to_vec(),
            data: Some(data),
        })
    }
}

// ── Verification ──────────────────────────────────────────────────────────────

/// Check `signature` over the digest of `data` against `data.renter`.
pub fn verify_allocation(signature: &[u8], data: &AllocationData) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(&data.renter).map_err(|_| CryptoError::BadPublicKey)?;
    let signature = Signature::from_slice(signature).map_err(|_| CryptoError::BadSignature)?;
    let digest = allocation_digest(data)?;
    key.verify_strict(&digest, &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Parse a hex-encoded 32-byte public key.
pub fn parse_public_key(hex_key: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(hex_key.trim()).map_err(|_| CryptoError::BadKeyEncoding)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::BadKeyEncoding)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("renter public key is not a valid ed25519 point")]
    BadPublicKey,

    #[error("signature must be 64 bytes")]
    BadSignature,

    #[error("signature does not match allocation")]
    VerificationFailed,

    #[error("key must be 32 hex-encoded bytes")]
    BadKeyEncoding,

    #[error("failed to encode allocation: {0}")]
    Encode(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

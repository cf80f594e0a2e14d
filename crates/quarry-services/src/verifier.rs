//! Allocation verification — is this credit really granted by a renter we accept?

use std::collections::HashSet;

use quarry_core::config::AuthConfig;
use quarry_core::crypto::{parse_public_key, verify_allocation};
use quarry_core::AllocationData;

pub trait AllocationVerifier: Send + Sync {
    /// True if `signature` authenticates `payload`.
    fn verify(&self, signature: &[u8], payload: &AllocationData) -> bool;
}

/// Ed25519 verification with an optional renter allow list.
///
/// An empty allow list accepts any renter whose signature checks out.
#[derive(Debug, Clone, Default)]
pub struct Ed25519Verifier {
    trusted: HashSet<[u8; 32]>,
}

impl Ed25519Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config. Malformed keys are skipped with a warning.
    pub fn from_config(config: &AuthConfig) -> Self {
        let mut verifier = Self::new();
        for hex_key in &config.trusted_renters {
            match parse_public_key(hex_key) {
                Ok(key) => {
                    verifier.trust(key);
                    tracing::info!(
                        renter = &hex_key[..16.min(hex_key.len())],
                        "trusted renter from config"
                    );
                }
                Err(e) => tracing::warn!(key = %hex_key, error = %e, "ignoring trusted renter"),
            }
        }
        verifier
    }

    pub fn trust(&mut self, renter: [u8; 32]) {
        self.trusted.insert(renter);
    }

    pub fn is_open(&self) -> bool {
        self.trusted.is_empty()
    }
}

impl AllocationVerifier for Ed25519Verifier {
    fn verify(&self, signature: &[u8], payload: &AllocationData) -> bool {
        if !self.is_open() && !self.trusted.contains(&payload.renter) {
            tracing::debug!(
                renter = hex::encode(&payload.renter[..8]),
                "allocation from untrusted renter"
            );
            return false;
        }
        match verify_allocation(signature, payload) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    renter = hex::encode(&payload.renter[..8]),
                    error = %e,
                    "allocation signature rejected"
                );
                false
            }
        }
    }
}

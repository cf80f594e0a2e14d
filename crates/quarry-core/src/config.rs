//! Configuration system for Quarry.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $QUARRY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/quarry/config.toml
//!   3. ~/.config/quarry/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::{DEFAULT_ALLOCATION, DEFAULT_API_PORT, DEFAULT_LISTEN_PORT, MAX_PAYLOAD};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub retrieval: RetrievalConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the retrieval listener binds to.
    pub listen_addr: String,
    /// TCP port for retrieval streams. 0 = OS-assigned.
    pub listen_port: u16,
    /// Local HTTP API port (bound on 127.0.0.1).
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the piece directory tree.
    pub pieces_path: PathBuf,
    /// SQLite database holding accepted bandwidth allocations.
    pub ledger_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Credit substituted for a negative allocation amount.
    pub default_allocation: u64,
    /// Upper bound on a single storage read, whatever the granted credit.
    pub max_read_size: u64,
    /// Largest data frame written to the client. Clamped to the wire maximum.
    pub max_message_size: usize,
    /// Abort a session after this many seconds without an inbound frame. 0 = never.
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Renter public keys (hex) allowed to pay for retrievals.
    /// Empty = any renter whose signature verifies.
    pub trusted_renters: Vec<String>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            api_port: DEFAULT_API_PORT,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            pieces_path: data_dir().join("pieces"),
            ledger_path: data_dir().join("ledger.db"),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_allocation: DEFAULT_ALLOCATION,
            max_read_size: 1024 * 1024, // 1 MiB
            max_message_size: 32 * 1024,
            idle_timeout_secs: 0,
        }
    }
}

impl RetrievalConfig {
    /// Data frame size actually used on the wire.
    pub fn message_size(&self) -> usize {
        self.max_message_size.clamp(1, MAX_PAYLOAD)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("quarry")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("quarry")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl QuarryConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            QuarryConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("QUARRY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&QuarryConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply QUARRY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QUARRY_NETWORK__LISTEN_PORT") {
            if let Ok(p) = v.parse() {
                self.network.listen_port = p;
            }
        }
        if let Ok(v) = std::env::var("QUARRY_NETWORK__API_PORT") {
            if let Ok(p) = v.parse() {
                self.network.api_port = p;
            }
        }
        if let Ok(v) = std::env::var("QUARRY_STORAGE__PIECES_PATH") {
            self.storage.pieces_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("QUARRY_STORAGE__LEDGER_PATH") {
            self.storage.ledger_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("QUARRY_RETRIEVAL__MAX_READ_SIZE") {
            if let Ok(n) = v.parse() {
                self.retrieval.max_read_size = n;
            }
        }
    }
}

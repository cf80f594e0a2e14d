//! Allocation ledger — durable record of every accepted bandwidth allocation.
//!
//! An allocation is recorded before any byte is sent against it. The ledger
//! is append-only and shared by all sessions; both implementations serialize
//! writers internally.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};
use serde::Serialize;

use quarry_core::crypto::{allocation_digest, CryptoError};
use quarry_core::AllocationData;

/// One accepted allocation, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// BLAKE3 digest the renter signed.
    #[serde(with = "hex_bytes")]
    pub digest: [u8; 32],
    #[serde(with = "hex_bytes")]
    pub renter: [u8; 32],
    pub piece_id: String,
    pub serial: u64,
    /// Amount as requested by the renter.
    pub requested: i64,
    /// Amount actually credited after normalization.
    pub credited: u64,
    #[serde(skip)]
    pub signature: Vec<u8>,
    /// Unix seconds.
    pub recorded_at: u64,
}

impl LedgerEntry {
    pub fn new(
        data: &AllocationData,
        signature: &[u8],
        credited: u64,
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            digest: allocation_digest(data)?,
            renter: data.renter,
            piece_id: data.piece_id.clone(),
            serial: data.serial,
            requested: data.amount,
            credited,
            signature: signature.to_vec(),
            recorded_at: unix_now(),
        })
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create ledger directory {0}: {1}")]
    CreateDir(std::path::PathBuf, std::io::Error),

    #[error("ledger lock poisoned")]
    Poisoned,

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Durable sink for accepted allocations.
pub trait AllocationLedger: Send + Sync {
    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;
}

// ── SQLite ────────────────────────────────────────────────────────────────────

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bandwidth_allocations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    digest      BLOB    NOT NULL,
    renter      BLOB    NOT NULL,
    piece_id    TEXT    NOT NULL,
    serial      INTEGER NOT NULL,
    requested   INTEGER NOT NULL,
    credited    INTEGER NOT NULL,
    signature   BLOB    NOT NULL,
    recorded_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_allocations_renter ON bandwidth_allocations (renter);
";

#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LedgerError::CreateDir(parent.to_path_buf(), e))?;
        }
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get::<_, String>(0))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::Poisoned)?;
        Ok(f(&conn)?)
    }

    pub fn count(&self) -> Result<u64, LedgerError> {
        self.with_conn(|c| {
            c.query_row("SELECT COUNT(*) FROM bandwidth_allocations", [], |r| {
                r.get::<_, i64>(0)
            })
        })
        .map(|n| n as u64)
    }

    /// Total credit accepted from one renter.
    pub fn total_for_renter(&self, renter: &[u8; 32]) -> Result<u64, LedgerError> {
        self.with_conn(|c| {
            c.query_row(
                "SELECT COALESCE(SUM(credited), 0) FROM bandwidth_allocations WHERE renter = ?1",
                params![&renter[..]],
                |r| r.get::<_, i64>(0),
            )
        })
        .map(|n| n as u64)
    }

    /// Most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT digest, renter, piece_id, serial, requested, credited, signature, recorded_at
                 FROM bandwidth_allocations ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |r| {
                Ok(LedgerEntry {
                    digest: blob32(r.get::<_, Vec<u8>>(0)?),
                    renter: blob32(r.get::<_, Vec<u8>>(1)?),
                    piece_id: r.get(2)?,
                    serial: r.get::<_, i64>(3)? as u64,
                    requested: r.get(4)?,
                    credited: r.get::<_, i64>(5)? as u64,
                    signature: r.get(6)?,
                    recorded_at: r.get::<_, i64>(7)? as u64,
                })
            })?;
            let entries = rows.collect::<rusqlite::Result<Vec<_>>>();
            entries
        })
    }
}

fn blob32(bytes: Vec<u8>) -> [u8; 32] {
    let mut out = [0u8; 32];
    let n = bytes.len().min(32);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

impl AllocationLedger for SqliteLedger {
    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO bandwidth_allocations
                 (digest, renter, piece_id, serial, requested, credited, signature, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    &entry.digest[..],
                    &entry.renter[..],
                    entry.piece_id,
                    entry.serial as i64,
                    entry.requested,
                    entry.credited as i64,
                    entry.signature,
                    entry.recorded_at as i64,
                ],
            )
        })?;
        tracing::trace!(
            renter = hex::encode(&entry.renter[..8]),
            piece = %entry.piece_id,
            credited = entry.credited,
            "allocation recorded"
        );
        Ok(())
    }
}

// ── Memory ────────────────────────────────────────────────────────────────────

/// In-memory ledger, in arrival order.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    entries: Arc<Mutex<Vec<LedgerEntry>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

impl AllocationLedger for MemoryLedger {
    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.entries
            .lock()
            .map_err(|_| LedgerError::Poisoned)?
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::crypto::RenterKeypair;

    fn entry(renter: &RenterKeypair, serial: u64, amount: i64) -> LedgerEntry {
        let msg = renter.allocate("piece1", serial, amount).unwrap();
        let data = msg.data.as_ref().unwrap();
        LedgerEntry::new(data, &msg.signature, amount.max(0) as u64).unwrap()
    }

    #[test]
    fn sqlite_record_and_query() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let renter = RenterKeypair::generate();
        let other = RenterKeypair::generate();

        ledger.record(&entry(&renter, 1, 5)).unwrap();
        ledger.record(&entry(&renter, 2, 6)).unwrap();
        ledger.record(&entry(&other, 1, 100)).unwrap();

        assert_eq!(ledger.count().unwrap(), 3);
        assert_eq!(ledger.total_for_renter(&renter.public()).unwrap(), 11);
        assert_eq!(ledger.total_for_renter(&other.public()).unwrap(), 100);

        let recent = ledger.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].renter, other.public());
        assert_eq!(recent[1].serial, 2);
        assert_eq!(recent[1].signature.len(), 64);
    }

    #[test]
    fn sqlite_persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!("quarry-ledger-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("ledger.db");
        let renter = RenterKeypair::generate();

        {
            let ledger = SqliteLedger::open(&path).unwrap();
            ledger.record(&entry(&renter, 1, 42)).unwrap();
        }
        let reopened = SqliteLedger::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        assert_eq!(reopened.recent(1).unwrap()[0].credited, 42);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn concurrent_writers_all_land() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let renter = Arc::new(RenterKeypair::generate());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                let renter = renter.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        ledger.record(&entry(&renter, i * 100 + j, 1)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.count().unwrap(), 80);
    }

    #[test]
    fn entry_serializes_hex_keys() {
        let renter = RenterKeypair::generate();
        let json = serde_json::to_value(entry(&renter, 1, 5)).unwrap();
        assert_eq!(json["renter"], hex::encode(renter.public()));
        assert!(json.get("signature").is_none());
    }
}

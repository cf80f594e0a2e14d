//! Piece storage — resolves a piece id to its bytes.
//!
//! Pieces on disk live in a three-level directory structure:
//!   {root}/{id[0..2]}/{id[2..4]}/{id[4..]}
//!
//! Pieces are immutable once written. The retrieval path only ever needs
//! `size` and a reader positioned at an offset, so that is all the
//! `PieceStore` trait exposes; backends are substitutable without touching
//! the flow-control logic.

use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Shortest id the directory layout can hold.
pub const MIN_PIECE_ID_LEN: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid piece id {0:?}")]
    InvalidId(String),

    #[error("piece {0} not found")]
    NotFound(String),

    #[error("storage i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read access to stored pieces. Shared by every session concurrently.
pub trait PieceStore: Send + Sync {
    /// Stored size of the piece in bytes.
    fn size(&self, id: &str) -> Result<u64, StoreError>;

    /// Open an independent reader over `[offset, offset + length)`.
    /// Reading past the stored end yields a short read, not an error.
    fn open_reader(&self, id: &str, offset: u64, length: u64) -> Result<PieceReader, StoreError>;

    /// Number of readers currently open against this store.
    fn open_readers(&self) -> usize;
}

/// Ids are used verbatim as path components, so only a safe alphabet is accepted.
pub fn validate_piece_id(id: &str) -> Result<(), StoreError> {
    let valid = id.len() >= MIN_PIECE_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// A bounded reader over one piece.
///
/// Counted against its store while alive; dropping it releases the
/// underlying handle on every exit path.
pub struct PieceReader {
    id: String,
    inner: Box<dyn AsyncRead + Send + Unpin>,
    open: Arc<AtomicUsize>,
}

impl PieceReader {
    fn new(id: &str, inner: Box<dyn AsyncRead + Send + Unpin>, open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::Relaxed);
        Self {
            id: id.to_string(),
            inner,
            open,
        }
    }

    /// Read up to `max` bytes. Fewer bytes means the piece is exhausted.
    pub async fn read_up_to(&mut self, max: usize) -> std::io::Result<Bytes> {
        let mut buf = Vec::with_capacity(max);
        (&mut self.inner).take(max as u64).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

impl Drop for PieceReader {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::Relaxed);
        tracing::trace!(piece = %self.id, "piece reader released");
    }
}

// ── Disk store ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DiskPieceStore {
    root: PathBuf,
    open: Arc<AtomicUsize>,
}

impl DiskPieceStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            open: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Filesystem path for a piece id.
    pub fn locate(&self, id: &str) -> Result<PathBuf, StoreError> {
        validate_piece_id(id)?;
        Ok(self.root.join(&id[0..2]).join(&id[2..4]).join(&id[4..]))
    }

    /// Store a piece locally.
    ///
    /// Writes are atomic: write to temp file, then rename. If the piece
    /// already exists, this is a no-op.
    pub fn put(&self, id: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.locate(id)?;
        if path.exists() {
            return Ok(());
        }
        let io_err = |path: &PathBuf| {
            let path = path.clone();
            move |source| StoreError::Io { path, source }
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(&parent.to_path_buf()))?;
        }

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path).map_err(io_err(&tmp_path))?;
            file.write_all(data).map_err(io_err(&tmp_path))?;
            file.sync_all().map_err(io_err(&tmp_path))?;
        }
        fs::rename(&tmp_path, &path).map_err(io_err(&path))?;

        tracing::trace!(piece = id, bytes = data.len(), "piece stored");
        Ok(())
    }

    /// Count stored pieces (for stats).
    pub fn count(&self) -> usize {
        self.walk().count()
    }

    /// Total bytes stored (for stats).
    pub fn total_bytes(&self) -> u64 {
        self.walk()
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum()
    }

    fn walk(&self) -> impl Iterator<Item = fs::DirEntry> {
        fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .flatten()
            .flat_map(|level1| fs::read_dir(level1.path()).into_iter().flatten().flatten())
            .flat_map(|level2| fs::read_dir(level2.path()).into_iter().flatten().flatten())
            .filter(|entry| entry.path().extension().map_or(true, |ext| ext != "tmp"))
    }
}

impl PieceStore for DiskPieceStore {
    fn size(&self, id: &str) -> Result<u64, StoreError> {
        let path = self.locate(id)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(StoreError::NotFound(id.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn open_reader(&self, id: &str, offset: u64, length: u64) -> Result<PieceReader, StoreError> {
        let path = self.locate(id)?;
        let mut file = fs::File::open(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(id.to_string())
            } else {
                StoreError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

        let reader = tokio::fs::File::from_std(file).take(length);
        Ok(PieceReader::new(id, Box::new(reader), self.open.clone()))
    }

    fn open_readers(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }
}

// ── Memory store ──────────────────────────────────────────────────────────────

/// In-memory store. Readers snapshot the piece at open time, so `truncate`
/// only affects readers opened afterwards.
#[derive(Clone, Default)]
pub struct MemoryPieceStore {
    pieces: Arc<DashMap<String, Bytes>>,
    open: Arc<AtomicUsize>,
}

impl MemoryPieceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: &str, data: impl Into<Bytes>) -> Result<(), StoreError> {
        validate_piece_id(id)?;
        self.pieces.insert(id.to_string(), data.into());
        Ok(())
    }

    /// Shorten a stored piece. Open readers keep their snapshot.
    pub fn truncate(&self, id: &str, len: usize) {
        if let Some(mut piece) = self.pieces.get_mut(id) {
            let keep = len.min(piece.len());
            *piece = piece.slice(..keep);
        }
    }
}

impl PieceStore for MemoryPieceStore {
    fn size(&self, id: &str) -> Result<u64, StoreError> {
        validate_piece_id(id)?;
        self.pieces
            .get(id)
            .map(|p| p.len() as u64)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn open_reader(&self, id: &str, offset: u64, length: u64) -> Result<PieceReader, StoreError> {
        validate_piece_id(id)?;
        let piece = self
            .pieces
            .get(id)
            .map(|p| p.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let start = (offset.min(piece.len() as u64)) as usize;
        let end = (offset.saturating_add(length).min(piece.len() as u64)) as usize;
        let window = std::io::Cursor::new(piece.slice(start..end));
        Ok(PieceReader::new(id, Box::new(window), self.open.clone()))
    }

    fn open_readers(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }
}

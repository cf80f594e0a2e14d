//! Quarry integration test harness.
//!
//! Every test starts an in-process retrieval listener on 127.0.0.1:0 and
//! talks to it over real TCP, either through `RetrievalClient` or frame by
//! frame with `raw_connect`.
//!
//!   cargo test --test integration

mod concurrency;
mod failures;
mod persistence;
mod retrieval;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use quarry_core::crypto::RenterKeypair;
use quarry_core::ClientMessage;
use quarry_services::{
    AllocationLedger, AllocationVerifier, Ed25519Verifier, FrameReader, FrameWriter,
    MemoryLedger, MemoryPieceStore, PieceStore, RetrievalContext, RetrievalLimits,
    RetrievalServer, RetrievalStats, ServerFrame,
};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const PIECE: &str = "piece1";

/// A running retrieval listener and handles on everything it shares.
pub struct Node {
    pub addr: SocketAddr,
    pub store: Arc<dyn PieceStore>,
    pub stats: RetrievalStats,
    pub shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<Result<()>>,
}

pub struct NodeBuilder {
    store: Arc<dyn PieceStore>,
    ledger: Arc<dyn AllocationLedger>,
    verifier: Arc<dyn AllocationVerifier>,
    limits: RetrievalLimits,
}

impl NodeBuilder {
    pub fn new(store: Arc<dyn PieceStore>) -> Self {
        Self {
            store,
            ledger: Arc::new(MemoryLedger::new()),
            verifier: Arc::new(Ed25519Verifier::new()),
            limits: RetrievalLimits::default(),
        }
    }

    pub fn ledger(mut self, ledger: Arc<dyn AllocationLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn AllocationVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn limits(mut self, limits: RetrievalLimits) -> Self {
        self.limits = limits;
        self
    }

    pub async fn start(self) -> Result<Node> {
        let stats = RetrievalStats::new();
        let ctx = RetrievalContext::new(self.store.clone(), self.ledger, self.verifier)
            .with_observer(Arc::new(stats.clone()))
            .with_limits(self.limits);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind test listener")?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let server = RetrievalServer::new(listener, ctx, shutdown_tx.clone());
        let task = tokio::spawn(server.run());

        Ok(Node {
            addr,
            store: self.store,
            stats,
            shutdown_tx,
            task,
        })
    }
}

impl Node {
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.task.await?
    }
}

/// A node serving `content` as `PIECE` from memory.
pub async fn memory_node(content: &'static [u8]) -> Result<(Node, MemoryPieceStore)> {
    let store = MemoryPieceStore::new();
    store.put(PIECE, content)?;
    let node = NodeBuilder::new(Arc::new(store.clone())).start().await?;
    Ok((node, store))
}

/// Frame-level connection for driving the protocol by hand.
pub struct RawConn {
    pub reader: FrameReader<OwnedReadHalf>,
    pub writer: FrameWriter<OwnedWriteHalf>,
}

pub async fn raw_connect(addr: SocketAddr) -> Result<RawConn> {
    let stream = TcpStream::connect(addr).await?;
    let (r, w) = stream.into_split();
    Ok(RawConn {
        reader: FrameReader::new(r),
        writer: FrameWriter::new(w),
    })
}

impl RawConn {
    pub async fn send(&mut self, msg: ClientMessage) -> Result<()> {
        self.writer.send_message(&msg).await?;
        Ok(())
    }

    pub async fn next(&mut self) -> Result<Option<ServerFrame>> {
        Ok(tokio::time::timeout(Duration::from_secs(5), self.reader.read_server_frame())
            .await
            .context("timed out waiting for a server frame")??)
    }

    pub async fn expect_data(&mut self) -> Result<bytes::Bytes> {
        match self.next().await? {
            Some(ServerFrame::Data(d)) => Ok(d),
            other => bail!("expected data, got {other:?}"),
        }
    }
}

/// Signs allocations with increasing serials.
pub struct Renter {
    pub keys: RenterKeypair,
    serial: AtomicU64,
}

impl Renter {
    pub fn new() -> Self {
        Self {
            keys: RenterKeypair::generate(),
            serial: AtomicU64::new(1),
        }
    }

    pub fn grant(&self, piece: &str, amount: i64) -> ClientMessage {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        ClientMessage::Allocation(
            self.keys
                .allocate(piece, serial, amount)
                .expect("allocation signs"),
        )
    }
}

/// Poll `cond` until it holds or five seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            bail!("condition not reached in time");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh temp dir, unique per test and process.
pub fn temp_dir(tag: &str) -> std::path::PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "quarry-it-{}-{}-{}",
        tag,
        std::process::id(),
        id
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

//! Retrieval listener — accepts TCP streams and runs one session per connection.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use quarry_core::RetrievalSummary;

use crate::error::RetrievalError;
use crate::session::{CancelSignal, RetrievalContext, RetrievalSession};
use crate::transport::{FrameReader, FrameWriter};

/// How long inbound frames are drained after the terminal frame, so the
/// peer sees an orderly close instead of a reset.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RetrievalServer {
    listener: TcpListener,
    ctx: RetrievalContext,
    shutdown_tx: broadcast::Sender<()>,
    shutdown: broadcast::Receiver<()>,
}

impl RetrievalServer {
    pub fn new(
        listener: TcpListener,
        ctx: RetrievalContext,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let shutdown = shutdown_tx.subscribe();
        Self {
            listener,
            ctx,
            shutdown_tx,
            shutdown,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(mut self) -> Result<()> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "retrieval listener ready");
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("retrieval listener shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let ctx = self.ctx.clone();
                    let cancel = CancelSignal::from_shutdown(self.shutdown_tx.subscribe());
                    tokio::spawn(async move {
                        tracing::debug!(peer = %peer, "retrieval stream opened");
                        if let Err(e) = serve_connection(stream, ctx, cancel).await {
                            tracing::trace!(peer = %peer, kind = ?e.kind(), "retrieval stream closed with error");
                        }
                    });
                }
            }
        }
    }
}

/// Run one retrieval over `stream`, then close it.
pub async fn serve_connection(
    stream: TcpStream,
    ctx: RetrievalContext,
    cancel: CancelSignal,
) -> Result<RetrievalSummary, RetrievalError> {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::trace!(error = %e, "set_nodelay failed");
    }
    let (read_half, write_half) = stream.into_split();
    let mut session = RetrievalSession::new(
        ctx,
        FrameReader::new(read_half),
        FrameWriter::new(write_half),
        cancel,
    );
    let result = session.run().await;

    let (mut reader, mut writer) = session.into_parts();
    if let Err(e) = writer.shutdown().await {
        tracing::trace!(error = %e, "shutdown after retrieval failed");
    }
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Ok(Some(_)) = reader.read_frame().await {}
    })
    .await;
    if drained.is_err() {
        tracing::debug!("peer kept the stream open after the terminal frame");
    }
    result
}

//! Stream transport — frame codec and the two seams the session talks through.
//!
//! `MessageSource` yields decoded client messages; `ResponseSink` accepts
//! outbound frames. TCP connections use `FrameReader` / `FrameWriter`;
//! in-process callers can plug tokio mpsc channels straight in.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use zerocopy::AsBytes;

use quarry_core::wire::{FrameHeader, FrameKind, WireError, HEADER_LEN};
use quarry_core::{ClientMessage, ErrorReport, RetrievalSummary};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Malformed(#[from] WireError),

    #[error("peer closed the stream")]
    Closed,

    #[error("no frame received within {0:?}")]
    IdleTimeout(Duration),
}

/// A frame travelling server → client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Data(Bytes),
    Close(RetrievalSummary),
    Error(ErrorReport),
}

/// Inbound half of a retrieval stream.
pub trait MessageSource: Send {
    /// Next message, or `None` once the client has closed its side.
    fn next_message(
        &mut self,
    ) -> impl Future<Output = Result<Option<ClientMessage>, TransportError>> + Send;
}

/// Outbound half of a retrieval stream.
pub trait ResponseSink: Send {
    /// Deliver one data frame. `data` never exceeds the wire maximum.
    fn send_data(&mut self, data: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send_close(
        &mut self,
        summary: RetrievalSummary,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send_error(
        &mut self,
        report: ErrorReport,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

// ── Frame codec ───────────────────────────────────────────────────────────────

pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read one frame. `None` on a clean end of stream between frames.
    pub async fn read_frame(&mut self) -> Result<Option<(FrameKind, Bytes)>, TransportError> {
        let mut header = [0u8; HEADER_LEN];
        if self.inner.read(&mut header[..1]).await? == 0 {
            return Ok(None);
        }
        self.inner.read_exact(&mut header[1..]).await?;
        let (kind, length) = FrameHeader::decode(&header)?;

        let mut payload = vec![0u8; length];
        self.inner.read_exact(&mut payload).await?;
        Ok(Some((kind, Bytes::from(payload))))
    }

    /// Client side: read the next server frame.
    pub async fn read_server_frame(&mut self) -> Result<Option<ServerFrame>, TransportError> {
        let Some((kind, payload)) = self.read_frame().await? else {
            return Ok(None);
        };
        let malformed = |e: serde_json::Error| WireError::Malformed {
            kind,
            reason: e.to_string(),
        };
        let frame = match kind {
            FrameKind::Data => ServerFrame::Data(payload),
            FrameKind::Close => ServerFrame::Close(serde_json::from_slice(&payload).map_err(malformed)?),
            FrameKind::Error => ServerFrame::Error(serde_json::from_slice(&payload).map_err(malformed)?),
            other => return Err(WireError::UnexpectedKind(other).into()),
        };
        Ok(Some(frame))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin + Send> MessageSource for FrameReader<R> {
    async fn next_message(&mut self) -> Result<Option<ClientMessage>, TransportError> {
        match self.read_frame().await? {
            Some((kind, payload)) => Ok(Some(ClientMessage::decode(kind, &payload)?)),
            None => Ok(None),
        }
    }
}

pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_frame(&mut self, kind: FrameKind, payload: &[u8]) -> Result<(), TransportError> {
        let header = FrameHeader::new(kind, payload.len())?;
        self.inner.write_all(header.as_bytes()).await?;
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Client side: send a descriptor or allocation.
    pub async fn send_message(&mut self, msg: &ClientMessage) -> Result<(), TransportError> {
        let payload = msg.encode()?;
        self.write_frame(msg.kind(), &payload).await
    }

    async fn write_json<T: serde::Serialize>(&mut self, kind: FrameKind, value: &T) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(value).map_err(|e| WireError::Malformed {
            kind,
            reason: e.to_string(),
        })?;
        self.write_frame(kind, &payload).await
    }

    /// Half-close: no more frames will be written.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin + Send> ResponseSink for FrameWriter<W> {
    async fn send_data(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.write_frame(FrameKind::Data, &data).await
    }

    async fn send_close(&mut self, summary: RetrievalSummary) -> Result<(), TransportError> {
        self.write_json(FrameKind::Close, &summary).await
    }

    async fn send_error(&mut self, report: ErrorReport) -> Result<(), TransportError> {
        self.write_json(FrameKind::Error, &report).await
    }
}

// ── Channels ──────────────────────────────────────────────────────────────────

impl MessageSource for mpsc::Receiver<ClientMessage> {
    async fn next_message(&mut self) -> Result<Option<ClientMessage>, TransportError> {
        Ok(self.recv().await)
    }
}

impl ResponseSink for mpsc::Sender<ServerFrame> {
    async fn send_data(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.send(ServerFrame::Data(data))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn send_close(&mut self, summary: RetrievalSummary) -> Result<(), TransportError> {
        self.send(ServerFrame::Close(summary))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn send_error(&mut self, report: ErrorReport) -> Result<(), TransportError> {
        self.send(ServerFrame::Error(report))
            .await
            .map_err(|_| TransportError::Closed)
    }
}

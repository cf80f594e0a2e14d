//! Retrieval client — fetches a piece range, paying for it as it arrives.
//!
//! Credit is granted in fixed-size installments: the next allocation is
//! sent only once the previous one has been fully delivered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use tokio::net::{TcpStream, ToSocketAddrs};

use quarry_core::crypto::{CryptoError, RenterKeypair};
use quarry_core::wire::DEFAULT_ALLOCATION;
use quarry_core::{ClientMessage, ErrorReport, PieceDescriptor, RetrievalSummary};

use crate::transport::{FrameReader, FrameWriter, ServerFrame, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("signing failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("server refused retrieval ({:?}): {}", .0.kind, .0.message)]
    Rejected(ErrorReport),

    #[error("server closed the stream without a summary")]
    Closed,
}

/// Bytes received plus the server's closing summary.
#[derive(Debug, Clone)]
pub struct Retrieved {
    pub data: bytes::Bytes,
    pub summary: RetrievalSummary,
}

pub struct RetrievalClient {
    renter: RenterKeypair,
    grant_size: u64,
    serial: AtomicU64,
}

impl RetrievalClient {
    pub fn new(renter: RenterKeypair) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(1);
        Self {
            renter,
            grant_size: DEFAULT_ALLOCATION,
            serial: AtomicU64::new(seed),
        }
    }

    /// Credit per installment. Zero is bumped to one byte.
    pub fn with_grant_size(mut self, bytes: u64) -> Self {
        self.grant_size = bytes.clamp(1, i64::MAX as u64);
        self
    }

    pub fn renter(&self) -> &RenterKeypair {
        &self.renter
    }

    pub async fn retrieve(
        &self,
        addr: impl ToSocketAddrs,
        descriptor: PieceDescriptor,
    ) -> Result<Retrieved, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Connect)?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half);
        let mut writer = FrameWriter::new(write_half);

        let piece_id = descriptor.id.clone();
        writer
            .send_message(&ClientMessage::Descriptor(descriptor))
            .await?;

        let mut data = BytesMut::new();
        let mut outstanding = self.grant(&mut writer, &piece_id).await?;

        loop {
            match reader.read_server_frame().await? {
                Some(ServerFrame::Data(chunk)) => {
                    data.extend_from_slice(&chunk);
                    outstanding = outstanding.saturating_sub(chunk.len() as u64);
                    if outstanding == 0 {
                        // The server may already be done; a refused write is not an error here.
                        match self.grant(&mut writer, &piece_id).await {
                            Ok(granted) => outstanding = granted,
                            Err(ClientError::Transport(e)) => {
                                tracing::debug!(error = %e, "grant not delivered")
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
                Some(ServerFrame::Close(summary)) => {
                    let _ = writer.shutdown().await;
                    return Ok(Retrieved {
                        data: data.freeze(),
                        summary,
                    });
                }
                Some(ServerFrame::Error(report)) => return Err(ClientError::Rejected(report)),
                None => return Err(ClientError::Closed),
            }
        }
    }

    async fn grant<W>(&self, writer: &mut FrameWriter<W>, piece_id: &str) -> Result<u64, ClientError>
    where
        W: tokio::io::AsyncWrite + Unpin + Send,
    {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let msg = self
            .renter
            .allocate(piece_id, serial, self.grant_size as i64)?;
        writer.send_message(&ClientMessage::Allocation(msg)).await?;
        Ok(self.grant_size)
    }
}

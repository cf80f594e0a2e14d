//! Retrieval session — drives one retrieval call from descriptor to summary.
//!
//! The session is an explicit state machine:
//!
//!   AwaitDescriptor → Validate → AwaitAllocation ⇄ ReadWrite → Done
//!                                                            ↘ Failed
//!
//! `step` performs exactly one transition so each state can be exercised on
//! its own; `run` loops until a terminal state and then writes the Close or
//! Error frame. Bytes are only ever sent against credit that has been both
//! verified and recorded in the ledger.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;

use quarry_core::config::RetrievalConfig;
use quarry_core::wire::SIZE_TO_END;
use quarry_core::{AllocationData, ClientMessage, PieceDescriptor, RetrievalSummary};

use crate::error::RetrievalError;
use crate::flow::{FlowController, FlowLimits};
use crate::ledger::{AllocationLedger, LedgerEntry, LedgerError};
use crate::observer::{NoopObserver, RetrievalObserver};
use crate::piece_store::{validate_piece_id, PieceReader, PieceStore};
use crate::transport::{MessageSource, ResponseSink, TransportError};
use crate::verifier::AllocationVerifier;
use crate::writer::StreamWriter;

/// Upper bound on delivering the Close or Error frame.
const TERMINAL_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-session bounds, derived from `[retrieval]` config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalLimits {
    pub flow: FlowLimits,
    pub max_message: usize,
    /// `None` waits for the client indefinitely.
    pub idle_timeout: Option<Duration>,
}

impl Default for RetrievalLimits {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for RetrievalLimits {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            flow: FlowLimits {
                default_allocation: config.default_allocation,
                max_read_size: config.max_read_size,
            },
            max_message: config.message_size(),
            idle_timeout: (config.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(config.idle_timeout_secs)),
        }
    }
}

/// Collaborators shared by every session on a node.
#[derive(Clone)]
pub struct RetrievalContext {
    pub store: Arc<dyn PieceStore>,
    pub ledger: Arc<dyn AllocationLedger>,
    pub verifier: Arc<dyn AllocationVerifier>,
    pub observer: Arc<dyn RetrievalObserver>,
    pub limits: RetrievalLimits,
}

impl RetrievalContext {
    pub fn new(
        store: Arc<dyn PieceStore>,
        ledger: Arc<dyn AllocationLedger>,
        verifier: Arc<dyn AllocationVerifier>,
    ) -> Self {
        Self {
            store,
            ledger,
            verifier,
            observer: Arc::new(NoopObserver),
            limits: RetrievalLimits::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetrievalObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_limits(mut self, limits: RetrievalLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Cancellation for one session, usually the daemon's shutdown broadcast.
pub struct CancelSignal {
    rx: Option<broadcast::Receiver<()>>,
}

impl CancelSignal {
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn from_shutdown(rx: broadcast::Receiver<()>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Resolves once cancellation is requested. A dropped sender never cancels.
    pub async fn cancelled(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            match rx.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
                Err(broadcast::error::RecvError::Closed) => self.rx = None,
            }
        }
        std::future::pending::<()>().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitDescriptor,
    Validate,
    AwaitAllocation,
    ReadWrite,
    Done,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }
}

pub struct RetrievalSession<S, K> {
    id: String,
    ctx: RetrievalContext,
    source: S,
    writer: StreamWriter<K>,
    cancel: CancelSignal,
    state: SessionState,
    descriptor: Option<PieceDescriptor>,
    reader: Option<PieceReader>,
    flow: Option<FlowController>,
    summary: Option<RetrievalSummary>,
    /// A data write was cut short; the stream may end mid-frame.
    outbound_broken: bool,
}

impl<S: MessageSource, K: ResponseSink> RetrievalSession<S, K> {
    pub fn new(ctx: RetrievalContext, source: S, sink: K, cancel: CancelSignal) -> Self {
        let writer = StreamWriter::new(sink, ctx.limits.max_message);
        Self {
            id: hex::encode(rand::random::<[u8; 8]>()),
            ctx,
            source,
            writer,
            cancel,
            state: SessionState::AwaitDescriptor,
            descriptor: None,
            reader: None,
            flow: None,
            summary: None,
            outbound_broken: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn flow(&self) -> Option<&FlowController> {
        self.flow.as_ref()
    }

    /// Absolute piece offset of the next byte to be read.
    pub fn cursor(&self) -> Option<u64> {
        let offset = self.descriptor.as_ref()?.offset;
        Some(offset + self.flow.as_ref().map_or(0, |f| f.retrieved()))
    }

    pub fn summary(&self) -> Option<&RetrievalSummary> {
        self.summary.as_ref()
    }

    /// Give back both halves of the stream, e.g. to drain and close it.
    pub fn into_parts(self) -> (S, K) {
        (self.source, self.writer.into_inner())
    }

    /// Drive the session to completion, then send the terminal frame.
    ///
    /// No terminal frame follows an interrupted data write, and delivery of
    /// the terminal frame is bounded by `TERMINAL_FRAME_TIMEOUT`.
    pub async fn run(&mut self) -> Result<RetrievalSummary, RetrievalError> {
        let result = loop {
            match self.step().await {
                Ok(SessionState::Done) => match self.summary.clone() {
                    Some(summary) => break Ok(summary),
                    None => break Err(RetrievalError::Protocol("session ended without a summary".into())),
                },
                Ok(SessionState::Failed) => {
                    break Err(RetrievalError::Protocol("session already failed".into()))
                }
                Ok(_) => continue,
                Err(e) => break Err(e),
            }
        };

        if self.outbound_broken {
            tracing::debug!(session = %self.id, "outbound stream interrupted, no terminal frame");
            return result;
        }

        let sink = self.writer.get_mut();
        let terminal = async {
            match &result {
                Ok(summary) => sink.send_close(summary.clone()).await,
                Err(e) => sink.send_error(e.report()).await,
            }
        };
        match tokio::time::timeout(TERMINAL_FRAME_TIMEOUT, terminal).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(session = %self.id, error = %e, "terminal frame not delivered")
            }
            Err(_) => tracing::debug!(session = %self.id, "terminal frame timed out"),
        }
        result
    }

    /// Perform one state transition.
    pub async fn step(&mut self) -> Result<SessionState, RetrievalError> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }
        match self.advance().await {
            Ok(next) => {
                self.state = next;
                if next == SessionState::Done {
                    self.finish();
                }
                Ok(next)
            }
            Err(e) => {
                self.state = SessionState::Failed;
                self.reader = None;
                self.ctx.observer.on_error(&self.id, &e);
                Err(e)
            }
        }
    }

    async fn advance(&mut self) -> Result<SessionState, RetrievalError> {
        match self.state {
            SessionState::AwaitDescriptor => self.await_descriptor().await,
            SessionState::Validate => self.validate().await,
            SessionState::AwaitAllocation => self.await_allocation().await,
            SessionState::ReadWrite => self.read_write().await,
            terminal => Ok(terminal),
        }
    }

    async fn await_descriptor(&mut self) -> Result<SessionState, RetrievalError> {
        match self.next_message().await? {
            Some(ClientMessage::Descriptor(descriptor)) => {
                self.descriptor = Some(descriptor);
                Ok(SessionState::Validate)
            }
            Some(ClientMessage::Allocation(_)) => Err(RetrievalError::Protocol(
                "expected a piece descriptor, got an allocation".into(),
            )),
            None => Err(RetrievalError::Protocol(
                "stream closed before a piece descriptor".into(),
            )),
        }
    }

    async fn validate(&mut self) -> Result<SessionState, RetrievalError> {
        let descriptor = self
            .descriptor
            .clone()
            .ok_or_else(|| RetrievalError::Protocol("no piece descriptor".into()))?;

        validate_piece_id(&descriptor.id)?;
        if descriptor.size < SIZE_TO_END {
            return Err(RetrievalError::Protocol(format!(
                "invalid size {}",
                descriptor.size
            )));
        }

        // Stores may touch the filesystem.
        let store = self.ctx.store.clone();
        let request = descriptor.clone();
        let (reader, target) =
            tokio::task::spawn_blocking(move || open_range(store.as_ref(), &request))
                .await
                .map_err(|e| RetrievalError::Storage(e.to_string()))??;

        self.reader = Some(reader);
        self.flow = Some(FlowController::new(target, self.ctx.limits.flow));
        self.ctx.observer.on_start(&self.id, &descriptor, target);

        if target == 0 {
            Ok(SessionState::Done)
        } else {
            Ok(SessionState::AwaitAllocation)
        }
    }

    async fn await_allocation(&mut self) -> Result<SessionState, RetrievalError> {
        let allocation = match self.next_message().await? {
            Some(ClientMessage::Allocation(allocation)) => allocation,
            Some(ClientMessage::Descriptor(_)) => {
                return Err(RetrievalError::Protocol("duplicate piece descriptor".into()))
            }
            None => return Err(TransportError::Closed.into()),
        };

        match allocation.data {
            Some(data) => self.accept(&allocation.signature, data).await?,
            None => self.ctx.observer.on_keep_alive(&self.id),
        }

        let ready = self
            .flow
            .as_ref()
            .is_some_and(|flow| flow.next_chunk().is_some());
        Ok(if ready {
            SessionState::ReadWrite
        } else {
            SessionState::AwaitAllocation
        })
    }

    /// Verify, record, then credit one allocation.
    async fn accept(&mut self, signature: &[u8], data: AllocationData) -> Result<(), RetrievalError> {
        let (Some(descriptor), Some(flow)) = (self.descriptor.as_ref(), self.flow.as_mut()) else {
            return Err(RetrievalError::Protocol("allocation before validation".into()));
        };

        if data.piece_id != descriptor.id {
            return Err(RetrievalError::Authentication(format!(
                "allocation is for piece {}, not {}",
                data.piece_id, descriptor.id
            )));
        }
        if !self.ctx.verifier.verify(signature, &data) {
            return Err(RetrievalError::Authentication(
                "signature verification failed".into(),
            ));
        }

        let credited = flow.normalize(data.amount);
        let entry = LedgerEntry::new(&data, signature, credited)
            .map_err(|e| RetrievalError::Protocol(e.to_string()))?;
        let ledger = self.ctx.ledger.clone();
        tokio::task::spawn_blocking(move || ledger.record(&entry))
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))??;

        flow.grant(data.amount);
        self.ctx.observer.on_allocation(&self.id, &data, credited);
        Ok(())
    }

    async fn read_write(&mut self) -> Result<SessionState, RetrievalError> {
        let Some(chunk) = self.flow.as_ref().and_then(FlowController::next_chunk) else {
            return Ok(self.after_chunk());
        };
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| RetrievalError::Storage("piece reader already released".into()))?;

        let bytes = reader
            .read_up_to(chunk as usize)
            .await
            .map_err(|e| RetrievalError::Storage(e.to_string()))?;
        if bytes.is_empty() {
            return Ok(SessionState::Done);
        }

        let sent = bytes.len() as u64;
        self.send(bytes).await?;

        let Some(flow) = self.flow.as_mut() else {
            return Ok(SessionState::Done);
        };
        flow.consume(sent);
        self.ctx.observer.on_chunk(&self.id, sent, flow.retrieved());

        if sent < chunk {
            // Short read: the piece ended before the target.
            return Ok(SessionState::Done);
        }
        Ok(self.after_chunk())
    }

    fn after_chunk(&self) -> SessionState {
        match self.flow.as_ref() {
            Some(flow) if flow.is_complete() => SessionState::Done,
            Some(flow) if flow.next_chunk().is_some() => SessionState::ReadWrite,
            Some(_) => SessionState::AwaitAllocation,
            None => SessionState::Done,
        }
    }

    fn finish(&mut self) {
        self.reader = None;
        let (Some(descriptor), Some(flow)) = (self.descriptor.as_ref(), self.flow.as_ref()) else {
            return;
        };
        let summary = RetrievalSummary {
            piece_id: descriptor.id.clone(),
            retrieved: flow.retrieved(),
            allocated: flow.allocated(),
            target: flow.target(),
        };
        self.ctx.observer.on_complete(&self.id, &summary);
        self.summary = Some(summary);
    }

    async fn next_message(&mut self) -> Result<Option<ClientMessage>, RetrievalError> {
        let idle = self.ctx.limits.idle_timeout;
        let source = &mut self.source;
        let cancel = &mut self.cancel;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RetrievalError::Cancelled),
            msg = recv_within(source, idle) => msg.map_err(RetrievalError::from),
        }
    }

    async fn send(&mut self, bytes: Bytes) -> Result<(), RetrievalError> {
        let writer = &mut self.writer;
        let cancel = &mut self.cancel;
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RetrievalError::Cancelled),
            sent = writer.write(bytes) => sent.map_err(RetrievalError::from),
        };
        if sent.is_err() {
            self.outbound_broken = true;
        }
        sent
    }
}

/// Resolve the requested range against the stored piece and open a reader on it.
fn open_range(
    store: &dyn PieceStore,
    descriptor: &PieceDescriptor,
) -> Result<(PieceReader, u64), RetrievalError> {
    let stored = store.size(&descriptor.id)?;
    if descriptor.offset > stored {
        return Err(RetrievalError::Protocol(format!(
            "offset {} beyond piece size {}",
            descriptor.offset, stored
        )));
    }
    let target = if descriptor.size == SIZE_TO_END {
        stored - descriptor.offset
    } else {
        descriptor.size as u64
    };
    let reader = store.open_reader(&descriptor.id, descriptor.offset, target)?;
    Ok((reader, target))
}

async fn recv_within<S: MessageSource>(
    source: &mut S,
    idle: Option<Duration>,
) -> Result<Option<ClientMessage>, TransportError> {
    match idle {
        Some(limit) => tokio::time::timeout(limit, source.next_message())
            .await
            .map_err(|_| TransportError::IdleTimeout(limit))?,
        None => source.next_message().await,
    }
}

//! TCP p2p transport to the node under test.
//!
//! Lifecycle:
//!   1. UDP session handshake (shared secret + nonces)
//!   2. TCP connect, send SYNC
//!   3. On ACK, send one REQUEST per configured capability
//!   4. Ready once every REQUEST is ALLOWED
//!
//! Inbound bytes accumulate in a buffer that is split into frames by
//! [`FrameCodec`]. Each frame is verified, decoded and dispatched in arrival
//! order. Extension payloads are decoded by their capability codec, appended
//! to the arrived-message log and queued as [`SyncEvent`]s for `wait_for`.
//! At most one event per [`SyncEventKind`] is pending: a newer message of a
//! kind replaces the unclaimed older one. The log keeps the most recent
//! [`ARRIVED_LOG_LIMIT`] messages.
//!
//! Outgoing frames are signed once, framed by [`FrameCodec`] and queued as
//! bytes. A write that hits backpressure resumes with the same bytes when the
//! socket is writable.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use peersim_crypto::SessionCipher;
use peersim_protocol::{
    BlockSyncMessage, Capability, ExtensionMessage, FrameCodec, HandshakeMessage, NegotiationBody,
    NodeId, Nonce, P2pMessage, ProtocolError, RequestMessage, ResponseMessage, SignedMessage,
    SyncMessage, PROTOCOL_VERSION,
};
use primitive_types::H256;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

use crate::negotiation::Negotiation;
use crate::session::{node_id_of, Session, SessionError};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Inbound sync messages kept for inspection.
pub const ARRIVED_LOG_LIMIT: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum P2pError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("protocol violation: {message} received in state {state:?}")]
    ProtocolViolation {
        state: TransportState,
        message: &'static str,
    },
    #[error("refused by peer: {reason}")]
    Refused { reason: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed by peer")]
    Closed,
    #[error("not connected")]
    NotConnected,
    #[error("session secret is not established")]
    NoSecret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    SyncSent,
    Negotiating,
    Ready,
}

/// Kind of inbound sync message, used to wait for a specific one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEventKind {
    Status,
    HeaderRequest,
    BodyRequest,
    HeaderResponse,
    BodyResponse,
    Parcels,
}

impl SyncEventKind {
    pub fn of(message: &SyncMessage) -> Option<Self> {
        match message {
            SyncMessage::Block(BlockSyncMessage::Status { .. }) => Some(SyncEventKind::Status),
            SyncMessage::Block(BlockSyncMessage::Request { message, .. }) => match message {
                RequestMessage::Headers { .. } => Some(SyncEventKind::HeaderRequest),
                RequestMessage::Bodies(_) => Some(SyncEventKind::BodyRequest),
                RequestMessage::StateHead | RequestMessage::StateChunk => None,
            },
            SyncMessage::Block(BlockSyncMessage::Response { message, .. }) => match message {
                ResponseMessage::Headers(_) => Some(SyncEventKind::HeaderResponse),
                ResponseMessage::Bodies(_) => Some(SyncEventKind::BodyResponse),
                ResponseMessage::StateHead | ResponseMessage::StateChunk => None,
            },
            SyncMessage::Parcel(_) => Some(SyncEventKind::Parcels),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub kind: SyncEventKind,
    pub message: SyncMessage,
}

#[derive(Debug, Clone)]
pub struct P2pOptions {
    /// Bound on `connect` and on every `wait_for`.
    pub timeout: Duration,
    /// Drop inbound frames whose signature does not match the local nonce.
    pub verify_signatures: bool,
    /// Capabilities requested after the handshake, in order.
    pub capabilities: Vec<Capability>,
}

impl Default for P2pOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            verify_signatures: true,
            capabilities: Capability::ALL.to_vec(),
        }
    }
}

pub struct P2pLayer {
    session: Session,
    target: SocketAddr,
    options: P2pOptions,
    stream: Option<TcpStream>,
    buffer: BytesMut,
    codec: FrameCodec,
    state: TransportState,
    negotiation: Negotiation,
    outbound: VecDeque<Bytes>,
    genesis_hash: H256,
    recent_header_request_id: Option<u64>,
    recent_body_request_id: Option<u64>,
    arrived: VecDeque<SyncMessage>,
    events: VecDeque<SyncEvent>,
}

impl P2pLayer {
    /// Transport to the node listening on `target`. The session may already
    /// be established; otherwise `connect` runs it first.
    pub fn new(session: Session, target: SocketAddr, options: P2pOptions) -> Self {
        Self {
            negotiation: Negotiation::new(&options.capabilities),
            session,
            target,
            options,
            stream: None,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            codec: FrameCodec,
            state: TransportState::Idle,
            outbound: VecDeque::new(),
            genesis_hash: H256::zero(),
            recent_header_request_id: None,
            recent_body_request_id: None,
            arrived: VecDeque::with_capacity(ARRIVED_LOG_LIMIT),
            events: VecDeque::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == TransportState::Ready
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }

    /// Genesis hash announced by the peer's last status message.
    pub fn genesis_hash(&self) -> H256 {
        self.genesis_hash
    }

    pub fn recent_header_request_id(&self) -> Option<u64> {
        self.recent_header_request_id
    }

    pub fn recent_body_request_id(&self) -> Option<u64> {
        self.recent_body_request_id
    }

    /// Recent inbound sync messages, oldest first.
    pub fn arrived_messages(&self) -> &VecDeque<SyncMessage> {
        &self.arrived
    }

    /// Capabilities the peer allowed, with the version it picked.
    pub fn allowed_capabilities(&self) -> &[(Capability, u64)] {
        self.negotiation.allowed()
    }

    fn cipher(&self) -> Result<SessionCipher, P2pError> {
        self.session.cipher().map_err(|_| P2pError::NoSecret)
    }

    fn local_nonce(&self) -> Nonce {
        self.session.nonce()
    }

    fn target_nonce(&self) -> Nonce {
        self.session.target_nonce()
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Establish the session, open the stream and run the handshake until
    /// every capability is negotiated.
    pub async fn connect(&mut self) -> Result<(), P2pError> {
        let timeout = self.options.timeout;
        tokio::time::timeout(timeout, self.run_connect())
            .await
            .map_err(|_| P2pError::Timeout(timeout))?
    }

    async fn run_connect(&mut self) -> Result<(), P2pError> {
        if !self.session.is_established() {
            self.session.connect().await?;
        }

        let stream = TcpStream::connect(self.target).await?;
        stream.set_nodelay(true)?;
        let local = stream.local_addr()?;
        tracing::info!(%local, remote = %self.target, "tcp connection open");
        self.stream = Some(stream);

        let port = self.session.local_port();
        let sync = HandshakeMessage::Sync {
            version: PROTOCOL_VERSION,
            port,
            node_id: NodeId::new(node_id_of(local).ip, port),
        };
        self.queue(P2pMessage::Handshake(sync))?;
        self.state = TransportState::SyncSent;
        self.flush().await?;

        while !self.is_ready() {
            self.pump().await?;
        }
        tracing::info!(
            capabilities = self.negotiation.allowed().len(),
            "p2p connection ready"
        );
        Ok(())
    }

    /// Shut the stream down. Queued frames are dropped.
    pub async fn close(&mut self) -> Result<(), P2pError> {
        use tokio::io::AsyncWriteExt;

        self.outbound.clear();
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
            tracing::info!(remote = %self.target, "tcp connection closed");
        }
        self.state = TransportState::Idle;
        Ok(())
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Append received bytes and dispatch every complete frame. Returns true
    /// if negotiation completed while handling them.
    pub fn feed(&mut self, data: &[u8]) -> Result<bool, P2pError> {
        self.buffer.extend_from_slice(data);
        self.process_buffer()
    }

    fn process_buffer(&mut self) -> Result<bool, P2pError> {
        let mut completed = false;
        // A malformed prefix means the stream is out of sync: abort.
        while let Some(frame) = self.codec.decode(&mut self.buffer)? {
            match self.on_p2p_message(&frame) {
                Ok(done) => completed |= done,
                Err(P2pError::Protocol(e)) if !e.is_fatal() => {
                    tracing::warn!(error = %e, len = frame.len(), "discarding undecodable frame");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(completed)
    }

    /// Handle one frame. Returns true when this frame completed negotiation.
    pub fn on_p2p_message(&mut self, frame: &[u8]) -> Result<bool, P2pError> {
        let signed = SignedMessage::from_bytes(frame)?;
        if self.options.verify_signatures {
            signed.verify(self.local_nonce())?;
        }
        let message = signed.inner()?;
        tracing::debug!(message = message.name(), "p2p message received");

        match message {
            P2pMessage::Handshake(HandshakeMessage::Ack { .. }) => {
                if self.state != TransportState::SyncSent {
                    return Err(self.violation("ACK"));
                }
                self.state = TransportState::Negotiating;
                for request in self.negotiation.requests() {
                    self.queue(P2pMessage::Negotiation(request))?;
                }
                Ok(self.complete_if_negotiated())
            }
            P2pMessage::Handshake(HandshakeMessage::Sync { .. }) => Err(self.violation("SYNC")),
            P2pMessage::Negotiation(msg) => match msg.body {
                NegotiationBody::Allowed { version } => {
                    if self.state != TransportState::Negotiating {
                        return Err(self.violation("ALLOWED"));
                    }
                    match self.negotiation.on_allowed(msg.seq, version) {
                        Some(_) => Ok(self.complete_if_negotiated()),
                        None => Err(self.violation("ALLOWED")),
                    }
                }
                NegotiationBody::Denied => match self.negotiation.on_denied(msg.seq) {
                    Some(capability) => Err(P2pError::Refused {
                        reason: format!("capability {capability} denied"),
                    }),
                    None => Err(self.violation("DENIED")),
                },
                NegotiationBody::Request { .. } => Err(self.violation("REQUEST")),
            },
            P2pMessage::Extension(ext) => {
                self.on_extension_message(ext)?;
                Ok(false)
            }
        }
    }

    fn complete_if_negotiated(&mut self) -> bool {
        if self.state == TransportState::Negotiating && self.negotiation.is_complete() {
            self.state = TransportState::Ready;
            return true;
        }
        false
    }

    fn violation(&self, message: &'static str) -> P2pError {
        P2pError::ProtocolViolation {
            state: self.state,
            message,
        }
    }

    fn on_extension_message(&mut self, ext: ExtensionMessage) -> Result<(), P2pError> {
        let data = if ext.encrypted {
            ext.plaintext(&self.cipher()?, self.local_nonce())?
        } else {
            ext.data
        };
        let message = SyncMessage::decode(&ext.extension_name, &data)?;
        let kind = SyncEventKind::of(&message)
            .ok_or(ProtocolError::NotImplemented("state sync message"))?;

        match &message {
            SyncMessage::Block(BlockSyncMessage::Status { genesis_hash, .. }) => {
                self.genesis_hash = *genesis_hash;
            }
            SyncMessage::Block(BlockSyncMessage::Request { id, message }) => match message {
                RequestMessage::Headers { .. } => self.recent_header_request_id = Some(*id),
                RequestMessage::Bodies(_) => self.recent_body_request_id = Some(*id),
                _ => {}
            },
            _ => {}
        }
        tracing::debug!(extension = %ext.extension_name, ?kind, "sync message received");

        if self.arrived.len() == ARRIVED_LOG_LIMIT {
            self.arrived.pop_front();
        }
        self.arrived.push_back(message.clone());
        self.events.retain(|e| e.kind != kind);
        self.events.push_back(SyncEvent { kind, message });
        Ok(())
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Sign and enqueue a frame. Signing happens once; retries reuse the bytes.
    fn queue(&mut self, message: P2pMessage) -> Result<(), P2pError> {
        tracing::debug!(message = message.name(), "queueing p2p message");
        let signed = SignedMessage::sign(&message, self.target_nonce())?;
        let mut frame = BytesMut::new();
        self.codec.encode(&signed, &mut frame)?;
        self.outbound.push_back(frame.freeze());
        Ok(())
    }

    /// Wrap `payload` in an extension message and write it.
    pub async fn send_extension_message(
        &mut self,
        extension_name: &str,
        extension_version: u64,
        payload: &[u8],
        encrypt: bool,
    ) -> Result<(), P2pError> {
        let ext = if encrypt {
            ExtensionMessage::encrypted(
                extension_name,
                extension_version,
                payload,
                &self.cipher()?,
                self.target_nonce(),
            )
        } else {
            ExtensionMessage::unencrypted(extension_name, extension_version, payload.to_vec())
        };
        self.queue(P2pMessage::Extension(ext))?;
        self.flush().await
    }

    /// Encode and send a sync message under its capability.
    pub async fn send_sync_message(
        &mut self,
        message: &SyncMessage,
        encrypt: bool,
    ) -> Result<(), P2pError> {
        let capability = message.capability();
        let payload = message.to_bytes()?;
        self.send_extension_message(capability.name(), capability.version(), &payload, encrypt)
            .await
    }

    /// Write every queued frame, in order.
    pub async fn flush(&mut self) -> Result<(), P2pError> {
        let stream = self.stream.as_ref().ok_or(P2pError::NotConnected)?;
        while let Some(frame) = self.outbound.front_mut() {
            while frame.has_remaining() {
                stream.writable().await?;
                match stream.try_write(frame.chunk()) {
                    Ok(0) => return Err(P2pError::Closed),
                    Ok(n) => frame.advance(n),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        tracing::trace!(pending = frame.remaining(), "write blocked, waiting");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            self.outbound.pop_front();
        }
        Ok(())
    }

    /// Read once from the stream and dispatch what arrived.
    async fn pump(&mut self) -> Result<bool, P2pError> {
        let stream = self.stream.as_mut().ok_or(P2pError::NotConnected)?;
        let n = stream.read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(P2pError::Closed);
        }
        let completed = self.process_buffer()?;
        self.flush().await?;
        Ok(completed)
    }

    /// Take the pending notification of `kind`, reading from the stream
    /// until one arrives.
    pub async fn wait_for(&mut self, kind: SyncEventKind) -> Result<SyncEvent, P2pError> {
        let timeout = self.options.timeout;
        tokio::time::timeout(timeout, self.next_event(kind))
            .await
            .map_err(|_| P2pError::Timeout(timeout))?
    }

    async fn next_event(&mut self, kind: SyncEventKind) -> Result<SyncEvent, P2pError> {
        loop {
            if let Some(pos) = self.events.iter().position(|e| e.kind == kind) {
                if let Some(event) = self.events.remove(pos) {
                    return Ok(event);
                }
            }
            self.pump().await?;
        }
    }
}

impl std::fmt::Debug for P2pLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("P2pLayer")
            .field("target", &self.target)
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("arrived", &self.arrived.len())
            .finish_non_exhaustive()
    }
}

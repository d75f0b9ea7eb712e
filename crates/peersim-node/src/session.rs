//! UDP session handshake -- key agreement and nonce exchange.
//!
//! Initiator:
//!   NODE_ID_REQUEST  ->  <- NODE_ID_RESPONSE
//!   SECRET_REQUEST   ->  <- SECRET_ALLOWED     (ECDH shared secret)
//!   NONCE_REQUEST    ->  <- NONCE_ALLOWED      (nonces swapped under AES-256-CBC)
//!
//! The first nonce travels under an all-zero IV; the reply is encrypted with
//! the requester's nonce as IV. The socket is dropped once established.
//!
//! The state machine is pure (`start`, `on_initiator_message`,
//! `on_responder_message`); `connect` and `listen` drive it over a socket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use peersim_crypto::{CryptoError, EphemeralKey, SessionCipher, ZERO_IV};
use peersim_protocol::session_message::MAX_PACKET_SIZE;
use peersim_protocol::{
    nonce_bytes, NodeId, Nonce, ProtocolError, SessionBody, SessionMessage, SessionWireFormat,
    Value,
};
use primitive_types::{H256, H512};
use tokio::net::UdpSocket;

/// Nonce sent by default; the node under test does not care about its value.
pub const DEFAULT_NONCE: Nonce = 0xDEAD_BEEF;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("protocol violation: {message} received in state {state:?}")]
    ProtocolViolation {
        state: SessionState,
        message: &'static str,
    },
    #[error("{stage} request refused by peer: {reason}")]
    Refused { stage: &'static str, reason: String },
    #[error("session handshake timed out after {0:?}")]
    Timeout(Duration),
    #[error("session is not established")]
    NotEstablished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    // Initiator
    AwaitingNodeIdResponse,
    AwaitingSecretAllowed,
    AwaitingNonceAllowed,
    // Responder
    ReceivedNodeIdRequest,
    ReceivedSecretRequest,
    Established,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Local UDP address to bind.
    pub bind_addr: SocketAddr,
    pub nonce: Nonce,
    /// Bound on the whole exchange.
    pub timeout: Duration,
    /// Shape of outgoing datagrams when initiating.
    pub wire_format: SessionWireFormat,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            nonce: DEFAULT_NONCE,
            timeout: Duration::from_secs(10),
            wire_format: SessionWireFormat::Sequenced,
        }
    }
}

/// Wire form of an address. IPv6 peers map to IPv4 where possible.
pub fn node_id_of(addr: SocketAddr) -> NodeId {
    let ip = match addr.ip() {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(ip) => ip.to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
    };
    NodeId::new(ip, addr.port())
}

pub struct Session {
    target: SocketAddr,
    options: SessionOptions,
    state: SessionState,
    key: Option<EphemeralKey>,
    secret: Option<H256>,
    target_nonce: Nonce,
    target_public: Option<H512>,
    local_port: u16,
    next_seq: u64,
}

impl Session {
    /// Session that will initiate the handshake towards `target`.
    pub fn new(target: SocketAddr, options: SessionOptions) -> Self {
        Self {
            target,
            local_port: options.bind_addr.port(),
            options,
            state: SessionState::Idle,
            key: None,
            secret: None,
            target_nonce: 0,
            target_public: None,
            next_seq: 0,
        }
    }

    /// Session that waits for a peer to initiate. The target is learned from
    /// the first NODE_ID_REQUEST.
    pub fn responder(options: SessionOptions) -> Self {
        let unspecified = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        Self::new(unspecified, options)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Port of the bound UDP socket (the configured port before binding).
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn nonce(&self) -> Nonce {
        self.options.nonce
    }

    /// Peer's nonce; zero until established.
    pub fn target_nonce(&self) -> Nonce {
        self.target_nonce
    }

    pub fn secret(&self) -> Option<H256> {
        self.secret
    }

    pub fn target_public_key(&self) -> Option<H512> {
        self.target_public
    }

    /// AES-256-CBC cipher keyed with the shared secret.
    pub fn cipher(&self) -> Result<SessionCipher, SessionError> {
        self.secret
            .map(|s| SessionCipher::new(s.0))
            .ok_or(SessionError::NotEstablished)
    }

    fn outgoing(&mut self, format: SessionWireFormat, body: SessionBody) -> SessionMessage {
        let seq = self.next_seq;
        self.next_seq += 1;
        SessionMessage::with_format(format, seq, body)
    }

    fn violation(&self, msg: &SessionMessage) -> SessionError {
        SessionError::ProtocolViolation {
            state: self.state,
            message: msg.body.name(),
        }
    }

    fn derive_secret(&mut self, peer_public: &H512) -> Result<SessionCipher, SessionError> {
        let key = self.key.get_or_insert_with(EphemeralKey::generate);
        let secret = key.shared_secret(&peer_public.0)?;
        self.secret = Some(H256(secret));
        self.target_public = Some(*peer_public);
        Ok(SessionCipher::new(secret))
    }

    fn public_key(&mut self) -> H512 {
        H512(self.key.get_or_insert_with(EphemeralKey::generate).public_key())
    }

    // ========================================================================
    // Initiator
    // ========================================================================

    /// First datagram of the initiator.
    pub fn start(&mut self) -> Result<SessionMessage, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::ProtocolViolation {
                state: self.state,
                message: "start",
            });
        }
        self.state = SessionState::AwaitingNodeIdResponse;
        let body = SessionBody::NodeIdRequest(node_id_of(self.target));
        Ok(self.outgoing(self.options.wire_format, body))
    }

    /// Advance the initiator on a received datagram. Returns the reply, if any.
    pub fn on_initiator_message(
        &mut self,
        msg: SessionMessage,
    ) -> Result<Option<SessionMessage>, SessionError> {
        let format = self.options.wire_format;
        match (self.state, &msg.body) {
            (SessionState::AwaitingNodeIdResponse, SessionBody::NodeIdResponse(_)) => {
                let public = self.public_key();
                self.state = SessionState::AwaitingSecretAllowed;
                Ok(Some(self.outgoing(format, SessionBody::SecretRequest(public))))
            }
            (SessionState::AwaitingSecretAllowed, SessionBody::SecretAllowed(peer_public)) => {
                let cipher = self.derive_secret(peer_public)?;
                let encrypted = cipher.encrypt(&ZERO_IV, &encode_nonce(self.options.nonce));
                self.state = SessionState::AwaitingNonceAllowed;
                Ok(Some(self.outgoing(format, SessionBody::NonceRequest(encrypted))))
            }
            (SessionState::AwaitingSecretAllowed, SessionBody::SecretDenied(reason)) => {
                Err(SessionError::Refused {
                    stage: "secret",
                    reason: reason.clone(),
                })
            }
            (SessionState::AwaitingNonceAllowed, SessionBody::NonceAllowed(encrypted)) => {
                let plaintext = self
                    .cipher()?
                    .decrypt(&nonce_bytes(self.options.nonce), encrypted)?;
                self.target_nonce = decode_nonce(&plaintext)?;
                self.state = SessionState::Established;
                Ok(None)
            }
            (SessionState::AwaitingNonceAllowed, SessionBody::NonceDenied(reason)) => {
                Err(SessionError::Refused {
                    stage: "nonce",
                    reason: reason.clone(),
                })
            }
            _ => Err(self.violation(&msg)),
        }
    }

    // ========================================================================
    // Responder
    // ========================================================================

    /// Advance the responder on a datagram received from `from`. Replies use
    /// the wire shape of the request.
    pub fn on_responder_message(
        &mut self,
        msg: SessionMessage,
        from: SocketAddr,
    ) -> Result<Option<SessionMessage>, SessionError> {
        let format = msg.format;
        match (self.state, &msg.body) {
            (SessionState::Idle, SessionBody::NodeIdRequest(_)) => {
                self.target = from;
                self.state = SessionState::ReceivedNodeIdRequest;
                Ok(Some(self.outgoing(format, SessionBody::NodeIdResponse(node_id_of(from)))))
            }
            (SessionState::ReceivedNodeIdRequest, SessionBody::SecretRequest(peer_public)) => {
                self.derive_secret(peer_public)?;
                let public = self.public_key();
                self.state = SessionState::ReceivedSecretRequest;
                Ok(Some(self.outgoing(format, SessionBody::SecretAllowed(public))))
            }
            (SessionState::ReceivedSecretRequest, SessionBody::NonceRequest(encrypted)) => {
                let cipher = self.cipher()?;
                let plaintext = cipher.decrypt(&ZERO_IV, encrypted)?;
                self.target_nonce = decode_nonce(&plaintext)?;
                let reply = cipher.encrypt(
                    &nonce_bytes(self.target_nonce),
                    &encode_nonce(self.options.nonce),
                );
                self.state = SessionState::Established;
                Ok(Some(self.outgoing(format, SessionBody::NonceAllowed(reply))))
            }
            _ => Err(self.violation(&msg)),
        }
    }

    // ========================================================================
    // Socket drivers
    // ========================================================================

    /// Bind the configured address and run the initiator handshake.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        let socket = UdpSocket::bind(self.options.bind_addr).await?;
        self.connect_with(socket).await
    }

    /// Run the initiator handshake on an already bound socket. The socket is
    /// closed when this returns.
    pub async fn connect_with(&mut self, socket: UdpSocket) -> Result<(), SessionError> {
        self.local_port = socket.local_addr()?.port();
        tracing::info!(
            target_addr = %self.target,
            local_port = self.local_port,
            "starting session handshake"
        );
        let timeout = self.options.timeout;
        tokio::time::timeout(timeout, self.run_initiator(&socket))
            .await
            .map_err(|_| SessionError::Timeout(timeout))??;
        tracing::info!(target_addr = %self.target, "session established");
        Ok(())
    }

    async fn run_initiator(&mut self, socket: &UdpSocket) -> Result<(), SessionError> {
        let first = self.start()?;
        send(socket, &first, self.target).await?;

        let mut buf = [0u8; MAX_PACKET_SIZE];
        while !self.is_established() {
            let (len, from) = socket.recv_from(&mut buf).await?;
            if from != self.target {
                tracing::debug!(%from, "ignoring datagram from unexpected address");
                continue;
            }
            let Some(msg) = parse(&buf[..len], from) else {
                continue;
            };
            if let Some(reply) = self.on_initiator_message(msg)? {
                send(socket, &reply, from).await?;
            }
        }
        Ok(())
    }

    /// Bind the configured address and answer one initiator. Returns the
    /// initiator's address.
    pub async fn listen(&mut self) -> Result<SocketAddr, SessionError> {
        let socket = UdpSocket::bind(self.options.bind_addr).await?;
        self.listen_on(socket).await
    }

    pub async fn listen_on(&mut self, socket: UdpSocket) -> Result<SocketAddr, SessionError> {
        self.local_port = socket.local_addr()?.port();
        tracing::info!(local_port = self.local_port, "waiting for session handshake");
        let timeout = self.options.timeout;
        tokio::time::timeout(timeout, self.run_responder(&socket))
            .await
            .map_err(|_| SessionError::Timeout(timeout))??;
        tracing::info!(peer = %self.target, "session established");
        Ok(self.target)
    }

    async fn run_responder(&mut self, socket: &UdpSocket) -> Result<(), SessionError> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        while !self.is_established() {
            let (len, from) = socket.recv_from(&mut buf).await?;
            if self.state != SessionState::Idle && from != self.target {
                tracing::debug!(%from, "ignoring datagram from unexpected address");
                continue;
            }
            let Some(msg) = parse(&buf[..len], from) else {
                continue;
            };
            if let Some(reply) = self.on_responder_message(msg, from)? {
                send(socket, &reply, from).await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.target)
            .field("state", &self.state)
            .field("local_port", &self.local_port)
            .finish_non_exhaustive()
    }
}

/// Decode a datagram; undecodable ones are logged and dropped.
fn parse(datagram: &[u8], from: SocketAddr) -> Option<SessionMessage> {
    match SessionMessage::from_bytes(datagram) {
        Ok(msg) => {
            tracing::debug!(message = msg.body.name(), seq = msg.seq, %from, "session message received");
            Some(msg)
        }
        Err(e) => {
            tracing::warn!(%from, error = %e, "discarding malformed session datagram");
            None
        }
    }
}

async fn send(socket: &UdpSocket, msg: &SessionMessage, to: SocketAddr) -> Result<(), SessionError> {
    tracing::debug!(message = msg.body.name(), seq = msg.seq, %to, "sending session message");
    socket.send_to(&msg.to_bytes(), to).await?;
    Ok(())
}

/// Nonce plaintext: the nonce as a minimal big-endian integer.
fn encode_nonce(nonce: Nonce) -> Vec<u8> {
    Value::from(nonce).to_bytes()
}

fn decode_nonce(plaintext: &[u8]) -> Result<Nonce, SessionError> {
    let value = Value::from_bytes(plaintext).map_err(ProtocolError::from)?;
    // Some peers send the full 16-byte width, leading zeros included.
    if matches!(value.as_bytes(), Ok(bytes) if bytes.len() == 16) {
        let wide = value.as_h128().map_err(ProtocolError::from)?;
        return Ok(u128::from_be_bytes(wide.0));
    }
    Ok(value.as_u128().map_err(ProtocolError::from)?)
}

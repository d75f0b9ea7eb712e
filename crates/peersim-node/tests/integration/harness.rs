//! Test harness for in-process peersim integration tests.
//!
//! Provides FakeNode: a scripted stand-in for the node under test that
//! answers the UDP session handshake, accepts one TCP connection, ACKs the
//! SYNC, allows capability requests and drives block sync the way a real
//! node would (status, header request, body request).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use peersim_crypto::SessionCipher;
use peersim_node::p2p_layer::{P2pLayer, P2pOptions};
use peersim_node::session::{Session, SessionOptions};
use peersim_protocol::{
    BlockSyncMessage, Capability, ExtensionMessage, FrameCodec, HandshakeMessage,
    NegotiationBody, NegotiationMessage, Nonce, P2pMessage, RequestMessage, ResponseMessage,
    SignedMessage, SyncMessage, PROTOCOL_VERSION,
};
use primitive_types::{H256, U256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;

/// Nonce of the fake node.
pub const PEER_NONCE: Nonce = 0x0123_4567_89ab_cdef_0011_2233_4455_6677;

/// Nonce of the harness side.
pub const LOCAL_NONCE: Nonce = 0xDEAD_BEEF;

/// Genesis hash announced by the fake node.
pub const GENESIS: H256 = H256([0x42; 32]);

/// Id the fake node uses for its header requests.
pub const HEADER_REQUEST_ID: u64 = 3;

/// Id the fake node uses for its body requests.
pub const BODY_REQUEST_ID: u64 = 5;

pub const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct FakeNodeOptions {
    /// Encrypt extension messages sent to the harness.
    pub encrypt: bool,
    /// Answer the REQUEST with this seq with DENIED.
    pub deny_seq: Option<u64>,
    /// Answer SYNC with a byte-string frame instead of ACK.
    pub string_frame_on_sync: bool,
}

/// A running scripted node.
pub struct FakeNode {
    pub udp_addr: SocketAddr,
    pub tcp_addr: SocketAddr,
    received: Arc<Mutex<Vec<SyncMessage>>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

#[allow(dead_code)]
impl FakeNode {
    pub async fn start(options: FakeNodeOptions) -> anyhow::Result<Self> {
        let udp = UdpSocket::bind("127.0.0.1:0").await?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let udp_addr = udp.local_addr()?;
        let tcp_addr = listener.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));
        let handle = tokio::spawn(run(udp, listener, options, received.clone()));
        Ok(Self {
            udp_addr,
            tcp_addr,
            received,
            handle,
        })
    }

    /// Unconnected transport pointed at this node.
    pub fn layer(&self) -> P2pLayer {
        let session = Session::new(self.udp_addr, local_session_options());
        P2pLayer::new(
            session,
            self.tcp_addr,
            P2pOptions {
                timeout: TIMEOUT,
                ..P2pOptions::default()
            },
        )
    }

    /// Sync messages received from the harness so far.
    pub fn received(&self) -> Vec<SyncMessage> {
        self.received.lock().unwrap().clone()
    }

    /// Poll until at least `n` sync messages have arrived, or timeout.
    pub async fn wait_received(&self, n: usize, timeout: Duration) -> anyhow::Result<Vec<SyncMessage>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let received = self.received();
            if received.len() >= n {
                return Ok(received);
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!(
                    "timeout waiting for {} messages (have {}): {:?}",
                    n,
                    received.len(),
                    received
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait for the scripted peer to see the connection close.
    pub async fn finish(self) -> anyhow::Result<()> {
        tokio::time::timeout(TIMEOUT, self.handle).await??
    }
}

pub fn local_session_options() -> SessionOptions {
    SessionOptions {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        nonce: LOCAL_NONCE,
        timeout: TIMEOUT,
        ..SessionOptions::default()
    }
}

async fn run(
    udp: UdpSocket,
    listener: TcpListener,
    options: FakeNodeOptions,
    received: Arc<Mutex<Vec<SyncMessage>>>,
) -> anyhow::Result<()> {
    let mut session = Session::responder(SessionOptions {
        nonce: PEER_NONCE,
        timeout: TIMEOUT,
        ..SessionOptions::default()
    });
    session.listen_on(udp).await?;

    let (stream, _) = tokio::time::timeout(TIMEOUT, listener.accept()).await??;
    let mut peer = ScriptedPeer {
        stream,
        buffer: BytesMut::new(),
        codec: FrameCodec,
        cipher: session.cipher()?,
        initiator_nonce: session.target_nonce(),
        options,
        received,
        allowed: 0,
    };
    peer.run().await
}

struct ScriptedPeer {
    stream: TcpStream,
    buffer: BytesMut,
    codec: FrameCodec,
    cipher: SessionCipher,
    initiator_nonce: Nonce,
    options: FakeNodeOptions,
    received: Arc<Mutex<Vec<SyncMessage>>>,
    allowed: usize,
}

impl ScriptedPeer {
    /// Serve until the harness disconnects. A reset counts as a disconnect.
    async fn run(&mut self) -> anyhow::Result<()> {
        match self.serve().await {
            Err(e) if is_disconnect(&e) => Ok(()),
            other => other,
        }
    }

    async fn serve(&mut self) -> anyhow::Result<()> {
        loop {
            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Ok(());
            }
            while let Some(frame) = self.codec.decode(&mut self.buffer)? {
                let signed = SignedMessage::from_bytes(&frame)?;
                signed.verify(PEER_NONCE)?;
                self.on_message(signed.inner()?).await?;
            }
        }
    }

    async fn on_message(&mut self, message: P2pMessage) -> anyhow::Result<()> {
        match message {
            P2pMessage::Handshake(HandshakeMessage::Sync { .. })
                if self.options.string_frame_on_sync =>
            {
                self.stream.write_all(&[0x83, b'b', b'a', b'd']).await?;
                Ok(())
            }
            P2pMessage::Handshake(HandshakeMessage::Sync { .. }) => {
                self.send(P2pMessage::Handshake(HandshakeMessage::Ack {
                    version: PROTOCOL_VERSION,
                }))
                .await
            }
            P2pMessage::Negotiation(NegotiationMessage {
                seq,
                body: NegotiationBody::Request { .. },
                ..
            }) => {
                if self.options.deny_seq == Some(seq) {
                    return self.send(negotiation(seq, NegotiationBody::Denied)).await;
                }
                self.send(negotiation(seq, NegotiationBody::Allowed { version: 0 }))
                    .await?;
                self.allowed += 1;
                if self.allowed == Capability::ALL.len() {
                    self.send_sync(SyncMessage::Block(BlockSyncMessage::Status {
                        total_score: U256::from(131_072u64),
                        best_hash: GENESIS,
                        genesis_hash: GENESIS,
                    }))
                    .await?;
                }
                Ok(())
            }
            P2pMessage::Extension(ext) => {
                let data = ext.plaintext(&self.cipher, PEER_NONCE)?;
                let message = SyncMessage::decode(&ext.extension_name, &data)?;
                self.received.lock().unwrap().push(message.clone());
                self.react(&message).await
            }
            other => anyhow::bail!("unexpected {} from harness", other.name()),
        }
    }

    /// Ask for headers after every status, for bodies after every header response.
    async fn react(&mut self, message: &SyncMessage) -> anyhow::Result<()> {
        match message {
            SyncMessage::Block(BlockSyncMessage::Status { .. }) => {
                self.send_sync(SyncMessage::Block(BlockSyncMessage::Request {
                    id: HEADER_REQUEST_ID,
                    message: RequestMessage::Headers {
                        start_number: 1,
                        max_count: 128,
                    },
                }))
                .await
            }
            SyncMessage::Block(BlockSyncMessage::Response { message, .. })
                if matches!(message, ResponseMessage::Headers(_)) =>
            {
                let hashes = message.decode_headers()?.iter().map(|h| h.hash()).collect();
                self.send_sync(SyncMessage::Block(BlockSyncMessage::Request {
                    id: BODY_REQUEST_ID,
                    message: RequestMessage::Bodies(hashes),
                }))
                .await
            }
            _ => Ok(()),
        }
    }

    async fn send(&mut self, message: P2pMessage) -> anyhow::Result<()> {
        let signed = SignedMessage::sign(&message, self.initiator_nonce)?;
        self.stream.write_all(&signed.to_bytes()).await?;
        Ok(())
    }

    async fn send_sync(&mut self, message: SyncMessage) -> anyhow::Result<()> {
        let capability = message.capability();
        let payload = message.to_bytes()?;
        let ext = if self.options.encrypt {
            ExtensionMessage::encrypted(
                capability.name(),
                capability.version(),
                &payload,
                &self.cipher,
                self.initiator_nonce,
            )
        } else {
            ExtensionMessage::unencrypted(capability.name(), capability.version(), payload)
        };
        self.send(P2pMessage::Extension(ext)).await
    }
}

fn is_disconnect(e: &anyhow::Error) -> bool {
    use std::io::ErrorKind;

    e.downcast_ref::<std::io::Error>().is_some_and(|e| {
        matches!(
            e.kind(),
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
        )
    })
}

fn negotiation(seq: u64, body: NegotiationBody) -> P2pMessage {
    P2pMessage::Negotiation(NegotiationMessage {
        version: PROTOCOL_VERSION,
        seq,
        body,
    })
}

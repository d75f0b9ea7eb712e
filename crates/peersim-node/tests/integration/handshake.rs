//! Session and transport handshake tests over loopback sockets.

use std::time::Duration;

use peersim_node::p2p_layer::{P2pError, TransportState};
use peersim_node::session::{Session, SessionError, SessionOptions, SessionState};
use peersim_protocol::{Capability, ProtocolError, SessionWireFormat};
use tokio::net::UdpSocket;

use crate::harness::{local_session_options, FakeNode, FakeNodeOptions, LOCAL_NONCE, PEER_NONCE};

async fn session_pair(wire_format: SessionWireFormat) -> (Session, Session) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    let responder = tokio::spawn(async move {
        let mut session = Session::responder(SessionOptions {
            nonce: PEER_NONCE,
            ..SessionOptions::default()
        });
        session.listen_on(socket).await.unwrap();
        session
    });

    let mut initiator = Session::new(
        addr,
        SessionOptions {
            wire_format,
            ..local_session_options()
        },
    );
    initiator.connect().await.unwrap();
    (initiator, responder.await.unwrap())
}

/// Scripted responder over UDP; the initiator learns its nonce.
#[tokio::test]
async fn test_session_handshake() {
    let (initiator, responder) = session_pair(SessionWireFormat::Sequenced).await;

    assert_eq!(initiator.state(), SessionState::Established);
    assert_eq!(initiator.target_nonce(), PEER_NONCE);
    assert_eq!(responder.target_nonce(), LOCAL_NONCE);
    assert_eq!(initiator.secret(), responder.secret());
    assert_eq!(responder.target().port(), initiator.local_port());
}

#[tokio::test]
async fn test_session_handshake_legacy_format() {
    let (initiator, responder) = session_pair(SessionWireFormat::Legacy).await;
    assert_eq!(initiator.target_nonce(), PEER_NONCE);
    assert!(responder.is_established());
}

/// A peer that never answers fails the handshake with a timeout.
#[tokio::test]
async fn test_session_timeout() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut session = Session::new(
        silent.local_addr().unwrap(),
        SessionOptions {
            timeout: Duration::from_millis(200),
            ..local_session_options()
        },
    );
    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, SessionError::Timeout(_)));
    assert_eq!(session.state(), SessionState::AwaitingNodeIdResponse);
}

/// Garbage from the peer is discarded; the handshake still completes.
#[tokio::test]
async fn test_session_ignores_malformed_datagram() {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    let responder = tokio::spawn(async move {
        // Reply with junk first, then run the real responder on the same socket.
        let mut buf = [0u8; 1024];
        let (len, from) = socket.recv_from(&mut buf).await.unwrap();
        socket.send_to(&[0xff, 0x00, 0x01], from).await.unwrap();

        let mut session = Session::responder(SessionOptions {
            nonce: PEER_NONCE,
            ..SessionOptions::default()
        });
        let request = peersim_protocol::SessionMessage::from_bytes(&buf[..len]).unwrap();
        let reply = session.on_responder_message(request, from).unwrap().unwrap();
        socket.send_to(&reply.to_bytes(), from).await.unwrap();
        session.listen_on(socket).await.unwrap();
    });

    let mut initiator = Session::new(addr, local_session_options());
    initiator.connect().await.unwrap();
    assert_eq!(initiator.target_nonce(), PEER_NONCE);
    responder.await.unwrap();
}

/// SYNC, ACK and both capability requests complete the connection.
#[tokio::test]
async fn test_p2p_connect_reaches_ready() {
    let node = FakeNode::start(FakeNodeOptions::default()).await.unwrap();
    let mut p2p = node.layer();

    p2p.connect().await.unwrap();
    assert_eq!(p2p.state(), TransportState::Ready);
    assert_eq!(p2p.session().target_nonce(), PEER_NONCE);
    let allowed: Vec<Capability> = p2p.allowed_capabilities().iter().map(|(c, _)| *c).collect();
    assert_eq!(allowed, Capability::ALL.to_vec());

    p2p.close().await.unwrap();
    node.finish().await.unwrap();
}

#[tokio::test]
async fn test_p2p_capability_denied() {
    let node = FakeNode::start(FakeNodeOptions {
        deny_seq: Some(1),
        ..FakeNodeOptions::default()
    })
    .await
    .unwrap();
    let mut p2p = node.layer();

    match p2p.connect().await {
        Err(P2pError::Refused { reason }) => assert!(reason.contains("parcel-propagation")),
        other => panic!("expected refusal, got {other:?}"),
    }
    assert!(!p2p.is_ready());
}

/// A frame that is not a list desynchronises the stream and fails the connect.
#[tokio::test]
async fn test_p2p_string_frame_aborts_connect() {
    let node = FakeNode::start(FakeNodeOptions {
        string_frame_on_sync: true,
        ..FakeNodeOptions::default()
    })
    .await
    .unwrap();
    let mut p2p = node.layer();

    match p2p.connect().await {
        Err(P2pError::Protocol(ProtocolError::NotAList(0x83))) => {}
        other => panic!("expected framing error, got {other:?}"),
    }
    assert_eq!(p2p.state(), TransportState::SyncSent);

    drop(p2p);
    node.finish().await.unwrap();
}

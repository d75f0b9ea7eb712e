//! Scripted block and parcel sync scenarios through TestHelper.

use peersim_node::test_helper::{self, TestHelper, DEFAULT_BEST_HASH};
use peersim_protocol::{
    BlockSyncMessage, ParcelSyncMessage, RequestMessage, ResponseMessage, SyncMessage, Value,
};
use primitive_types::U256;

use crate::harness::{FakeNode, FakeNodeOptions, BODY_REQUEST_ID, GENESIS, HEADER_REQUEST_ID, TIMEOUT};

async fn established(options: FakeNodeOptions) -> (FakeNode, TestHelper) {
    let node = FakeNode::start(options).await.unwrap();
    let mut helper = TestHelper::new(node.layer());
    helper.establish(None, None).await.unwrap();
    (node, helper)
}

/// Establish exchanges status both ways and leaves the node asking for headers.
#[tokio::test]
async fn test_establish() {
    let (node, mut helper) = established(FakeNodeOptions::default()).await;

    assert_eq!(helper.genesis_hash(), GENESIS);
    assert_eq!(helper.block_header_request(), Some((1, 128)));
    assert_eq!(
        helper.p2p().recent_header_request_id(),
        Some(HEADER_REQUEST_ID)
    );

    let received = node.wait_received(1, TIMEOUT).await.unwrap();
    assert_eq!(
        received[0],
        SyncMessage::Block(BlockSyncMessage::Status {
            total_score: U256::from(99_999_999_999_999_999u64),
            best_hash: DEFAULT_BEST_HASH,
            genesis_hash: GENESIS,
        })
    );

    helper.end().await.unwrap();
    node.finish().await.unwrap();
}

/// Headers go out, the node asks for their bodies, bodies answer that request.
#[tokio::test]
async fn test_send_block() {
    let (node, mut helper) = established(FakeNodeOptions::default()).await;

    let genesis = test_helper::solo_genesis_block_header();
    let block1 = test_helper::solo_block_1(genesis.hash());
    let block2 = test_helper::solo_block_2(block1.hash());
    helper
        .send_block(&[block1.clone(), block2.clone()], vec![Vec::new(), Vec::new()])
        .await
        .unwrap();

    assert_eq!(
        helper.block_body_request(),
        Some(&[block1.hash(), block2.hash()][..])
    );

    // status (establish), status, headers, bodies
    let received = node.wait_received(4, TIMEOUT).await.unwrap();
    assert!(matches!(
        received[1],
        SyncMessage::Block(BlockSyncMessage::Status { best_hash, .. }) if best_hash == block2.hash()
    ));
    match &received[2] {
        SyncMessage::Block(BlockSyncMessage::Response { id, message }) => {
            assert_eq!(*id, HEADER_REQUEST_ID);
            assert_eq!(message.decode_headers().unwrap(), vec![block1, block2]);
        }
        other => panic!("expected header response, got {other:?}"),
    }
    assert_eq!(
        received[3],
        SyncMessage::Block(BlockSyncMessage::Response {
            id: BODY_REQUEST_ID,
            message: ResponseMessage::Bodies(vec![Vec::new(), Vec::new()]),
        })
    );

    helper.end().await.unwrap();
    node.finish().await.unwrap();
}

#[tokio::test]
async fn test_send_encoded_parcel() {
    let (node, mut helper) = established(FakeNodeOptions::default()).await;

    let parcels = vec![
        Value::List(vec![Value::from(1u64), Value::from(&b"payload"[..])]),
        Value::List(Vec::new()),
    ];
    helper.send_encoded_parcel(parcels.clone()).await.unwrap();

    let received = node.wait_received(2, TIMEOUT).await.unwrap();
    assert_eq!(received[1], SyncMessage::Parcel(ParcelSyncMessage::new(parcels)));

    helper.end().await.unwrap();
    node.finish().await.unwrap();
}

/// Encrypted extension payloads in both directions.
#[tokio::test]
async fn test_encrypted_extensions() {
    let (node, mut helper) = established(FakeNodeOptions {
        encrypt: true,
        ..FakeNodeOptions::default()
    })
    .await;
    assert_eq!(helper.genesis_hash(), GENESIS);

    let request = SyncMessage::Block(BlockSyncMessage::Request {
        id: 77,
        message: RequestMessage::Headers {
            start_number: 0,
            max_count: 16,
        },
    });
    helper
        .p2p_mut()
        .send_sync_message(&request, true)
        .await
        .unwrap();

    let received = node.wait_received(2, TIMEOUT).await.unwrap();
    assert_eq!(received[1], request);

    helper.end().await.unwrap();
    node.finish().await.unwrap();
}

/// The header request helper uses a fixed id and reaches the node intact.
#[tokio::test]
async fn test_send_header_request() {
    let (node, mut helper) = established(FakeNodeOptions::default()).await;
    helper.send_header_request(5, 10).await.unwrap();

    let received = node.wait_received(2, TIMEOUT).await.unwrap();
    assert_eq!(
        received[1],
        SyncMessage::Block(BlockSyncMessage::Request {
            id: 1,
            message: RequestMessage::Headers {
                start_number: 5,
                max_count: 10,
            },
        })
    );

    helper.end().await.unwrap();
    node.finish().await.unwrap();
}

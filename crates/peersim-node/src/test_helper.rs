//! Scripted scenarios on top of [`P2pLayer`]: establish a connection the way
//! a syncing peer would, push headers, bodies and parcels, and inspect what
//! the node sent back.

use peersim_protocol::{
    BlockSyncMessage, Header, ParcelSyncMessage, RequestMessage, ResponseMessage, SyncMessage,
    Value, BLAKE_NULL_RLP,
};
use primitive_types::{H160, H256, U256};

use crate::p2p_layer::{P2pError, P2pLayer, SyncEventKind};

/// Score announced by `establish` when the caller gives none.
pub const DEFAULT_BEST_SCORE: u64 = 99_999_999_999_999_999;

/// Best hash announced by `establish` when the caller gives none.
pub const DEFAULT_BEST_HASH: H256 = H256([
    0x64, 0x9f, 0xb3, 0x5c, 0x0e, 0x30, 0x4e, 0xb6, 0x01, 0xae, 0x71, 0xfe, 0x33, 0x07, 0x29, 0xa2,
    0xc1, 0xa2, 0x76, 0x87, 0xae, 0x7e, 0x2b, 0x01, 0x70, 0x86, 0x6b, 0x86, 0x04, 0x7a, 0x7b, 0xb9,
]);

/// Id of header requests sent by the helper.
const HEADER_REQUEST_ID: u64 = 1;

/// State root of the solo-consensus sample chain.
const SOLO_STATE_ROOT: H256 = H256([
    0x09, 0xf9, 0x43, 0x12, 0x2b, 0xfb, 0xb8, 0x5a, 0xdd, 0xa8, 0x20, 0x9b, 0xa7, 0x25, 0x14, 0x37,
    0x4f, 0x71, 0x82, 0x6f, 0xd8, 0x74, 0xe0, 0x88, 0x55, 0xb6, 0x4b, 0xc9, 0x54, 0x98, 0xcb, 0x02,
]);

const SOLO_GENESIS_EXTRA_DATA: [u8; 32] = [
    23, 108, 91, 111, 253, 100, 40, 143, 87, 206, 189, 160, 126, 135, 186, 91, 4, 70, 5, 195, 246,
    153, 51, 67, 233, 113, 143, 161, 0, 209, 115, 124,
];

const SOLO_GENESIS_SCORE: u64 = 131_072;
const SOLO_BLOCK_SCORE: u64 = 999_999_999_999_999;

pub struct TestHelper {
    p2p: P2pLayer,
}

impl TestHelper {
    pub fn new(p2p: P2pLayer) -> Self {
        Self { p2p }
    }

    pub fn p2p(&self) -> &P2pLayer {
        &self.p2p
    }

    pub fn p2p_mut(&mut self) -> &mut P2pLayer {
        &mut self.p2p
    }

    pub fn genesis_hash(&self) -> H256 {
        self.p2p.genesis_hash()
    }

    /// Connect, answer the node's status with our own and wait until it asks
    /// for headers.
    pub async fn establish(
        &mut self,
        best_hash: Option<H256>,
        best_score: Option<U256>,
    ) -> Result<(), P2pError> {
        self.p2p.connect().await?;
        self.wait_status_message().await?;

        let score = best_score.unwrap_or_else(|| U256::from(DEFAULT_BEST_SCORE));
        let best = best_hash.unwrap_or(DEFAULT_BEST_HASH);
        let genesis = self.p2p.genesis_hash();
        self.send_status(score, best, genesis).await?;
        self.wait_header_request().await?;
        tracing::info!(%genesis, "connection established");
        Ok(())
    }

    pub async fn end(&mut self) -> Result<(), P2pError> {
        self.p2p.close().await
    }

    // ========================================================================
    // Sending
    // ========================================================================

    async fn send_block_sync(&mut self, message: BlockSyncMessage) -> Result<(), P2pError> {
        self.p2p
            .send_sync_message(&SyncMessage::Block(message), false)
            .await
    }

    pub async fn send_status(
        &mut self,
        total_score: U256,
        best_hash: H256,
        genesis_hash: H256,
    ) -> Result<(), P2pError> {
        self.send_block_sync(BlockSyncMessage::Status {
            total_score,
            best_hash,
            genesis_hash,
        })
        .await
    }

    pub async fn send_header_request(
        &mut self,
        start_number: u64,
        max_count: u64,
    ) -> Result<(), P2pError> {
        self.send_block_sync(BlockSyncMessage::Request {
            id: HEADER_REQUEST_ID,
            message: RequestMessage::Headers {
                start_number,
                max_count,
            },
        })
        .await
    }

    /// Answer the node's most recent header request.
    pub async fn send_block_header_response(&mut self, headers: Vec<Value>) -> Result<(), P2pError> {
        let id = self.p2p.recent_header_request_id().unwrap_or_default();
        self.send_block_sync(BlockSyncMessage::Response {
            id,
            message: ResponseMessage::Headers(headers),
        })
        .await
    }

    /// Answer the node's most recent body request.
    pub async fn send_block_body_response(
        &mut self,
        bodies: Vec<Vec<Value>>,
    ) -> Result<(), P2pError> {
        let id = self.p2p.recent_body_request_id().unwrap_or_default();
        self.send_block_sync(BlockSyncMessage::Response {
            id,
            message: ResponseMessage::Bodies(bodies),
        })
        .await
    }

    pub async fn send_parcel_sync_message(
        &mut self,
        message: ParcelSyncMessage,
    ) -> Result<(), P2pError> {
        self.p2p
            .send_sync_message(&SyncMessage::Parcel(message), false)
            .await
    }

    /// Announce `best_hash`, send the headers, then the bodies once the node
    /// asks for them.
    pub async fn send_encoded_block(
        &mut self,
        headers: Vec<Value>,
        bodies: Vec<Vec<Value>>,
        best_hash: H256,
        best_score: U256,
    ) -> Result<(), P2pError> {
        let genesis = self.p2p.genesis_hash();
        self.send_status(best_score, best_hash, genesis).await?;
        self.send_block_header_response(headers).await?;
        tracing::debug!("header response sent");
        self.wait_body_request().await?;
        self.send_block_body_response(bodies).await?;
        tracing::debug!("body response sent");
        Ok(())
    }

    /// `send_encoded_block` with the last header as best block.
    pub async fn send_block(
        &mut self,
        headers: &[Header],
        bodies: Vec<Vec<Value>>,
    ) -> Result<(), P2pError> {
        let (best_hash, best_score) = headers
            .last()
            .map(|h| (h.hashing(), h.score()))
            .unwrap_or((self.p2p.genesis_hash(), U256::zero()));
        let encoded = headers.iter().map(Header::to_value).collect();
        self.send_encoded_block(encoded, bodies, best_hash, best_score)
            .await
    }

    pub async fn send_encoded_parcel(&mut self, parcels: Vec<Value>) -> Result<(), P2pError> {
        tracing::debug!(count = parcels.len(), "sending parcels");
        self.send_parcel_sync_message(ParcelSyncMessage::new(parcels))
            .await
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    fn latest_block_message<'a, T>(
        &'a self,
        pick: impl Fn(&'a BlockSyncMessage) -> Option<T>,
    ) -> Option<T> {
        self.p2p.arrived_messages().iter().rev().find_map(|m| match m {
            SyncMessage::Block(block) => pick(block),
            SyncMessage::Parcel(_) => None,
        })
    }

    /// `(start_number, max_count)` of the most recent header request.
    pub fn block_header_request(&self) -> Option<(u64, u64)> {
        self.latest_block_message(|m| match m {
            BlockSyncMessage::Request {
                message:
                    RequestMessage::Headers {
                        start_number,
                        max_count,
                    },
                ..
            } => Some((*start_number, *max_count)),
            _ => None,
        })
    }

    /// Hashes asked for by the most recent body request.
    pub fn block_body_request(&self) -> Option<&[H256]> {
        self.latest_block_message(|m| match m {
            BlockSyncMessage::Request {
                message: RequestMessage::Bodies(hashes),
                ..
            } => Some(hashes.as_slice()),
            _ => None,
        })
    }

    /// Encoded headers of the most recent header response.
    pub fn block_header_response(&self) -> Option<&[Value]> {
        self.latest_block_message(|m| match m {
            BlockSyncMessage::Response {
                message: ResponseMessage::Headers(headers),
                ..
            } => Some(headers.as_slice()),
            _ => None,
        })
    }

    pub fn block_body_response(&self) -> Option<&[Vec<Value>]> {
        self.latest_block_message(|m| match m {
            BlockSyncMessage::Response {
                message: ResponseMessage::Bodies(bodies),
                ..
            } => Some(bodies.as_slice()),
            _ => None,
        })
    }

    /// Parcels of the most recent parcel sync message.
    pub fn parcel_sync_message(&self) -> Option<&[Value]> {
        self.p2p.arrived_messages().iter().rev().find_map(|m| match m {
            SyncMessage::Parcel(msg) => Some(msg.parcels.as_slice()),
            SyncMessage::Block(_) => None,
        })
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    pub async fn wait_status_message(&mut self) -> Result<SyncMessage, P2pError> {
        Ok(self.p2p.wait_for(SyncEventKind::Status).await?.message)
    }

    pub async fn wait_header_request(&mut self) -> Result<SyncMessage, P2pError> {
        Ok(self.p2p.wait_for(SyncEventKind::HeaderRequest).await?.message)
    }

    pub async fn wait_body_request(&mut self) -> Result<SyncMessage, P2pError> {
        Ok(self.p2p.wait_for(SyncEventKind::BodyRequest).await?.message)
    }

    pub async fn wait_header_response(&mut self) -> Result<SyncMessage, P2pError> {
        Ok(self.p2p.wait_for(SyncEventKind::HeaderResponse).await?.message)
    }

    pub async fn wait_body_response(&mut self) -> Result<SyncMessage, P2pError> {
        Ok(self.p2p.wait_for(SyncEventKind::BodyResponse).await?.message)
    }
}

// ============================================================================
// Sample chain (solo consensus)
// ============================================================================

pub fn solo_genesis_block_header() -> Header {
    Header::default()
        .with_extra_data(SOLO_GENESIS_EXTRA_DATA.to_vec())
        .with_parcels_root(BLAKE_NULL_RLP)
        .with_state_root(SOLO_STATE_ROOT)
        .with_invoice_root(BLAKE_NULL_RLP)
        .with_score(U256::from(SOLO_GENESIS_SCORE))
}

fn solo_block(parent: H256, number: u64, timestamp: u64, author: H160) -> Header {
    Header::default()
        .with_parent_hash(parent)
        .with_timestamp(timestamp)
        .with_number(number)
        .with_author(author)
        .with_state_root(SOLO_STATE_ROOT)
        .with_score(U256::from(SOLO_BLOCK_SCORE))
}

pub fn solo_block_1(parent: H256) -> Header {
    solo_block(parent, 1, 1_537_509_963, H160::repeat_byte(0x77))
}

pub fn solo_block_2(parent: H256) -> Header {
    solo_block(parent, 2, 1_537_944_287, H160::repeat_byte(0x66))
}

//! Peersim Protocol -- wire codecs spoken with the node under test.
//!
//! Three layers share one RLP value tree (`value`):
//! - UDP session datagrams (`session_message`)
//! - TCP p2p frames, signed and optionally encrypted (`p2p_message`, `codec`)
//! - extension payloads carried inside p2p frames (`block_sync`, `parcel_sync`)

pub mod block_sync;
pub mod codec;
pub mod extension;
pub mod header;
pub mod p2p_message;
pub mod parcel_sync;
pub mod session_message;
pub mod value;

pub use block_sync::{BlockSyncMessage, RequestMessage, ResponseMessage};
pub use codec::FrameCodec;
pub use extension::{Capability, SyncMessage};
pub use header::{Header, BLAKE_NULL_RLP};
pub use p2p_message::{
    ExtensionMessage, HandshakeMessage, NegotiationBody, NegotiationMessage, P2pMessage,
    SignedMessage,
};
pub use parcel_sync::ParcelSyncMessage;
pub use session_message::{NodeId, SessionBody, SessionMessage, SessionWireFormat};
pub use value::{RlpError, Value};

/// Version field written into every session and p2p message.
pub const PROTOCOL_VERSION: u64 = 0;

/// Session and p2p nonces are 128-bit integers.
pub type Nonce = u128;

/// Big-endian form of a nonce, used as AES IV and as signing key.
pub fn nonce_bytes(nonce: Nonce) -> [u8; 16] {
    nonce.to_be_bytes()
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("rlp error: {0}")]
    Rlp(#[from] RlpError),
    #[error("unknown {kind} message id {id}")]
    UnknownMessageId { kind: &'static str, id: u64 },
    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: &'static str, reason: String },
    #[error("expected block sync response {expected:#04x}, got {got:#04x}")]
    UnexpectedResponse { expected: u8, got: u8 },
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    #[error("unknown extension: {0}")]
    UnknownExtension(String),
    #[error("frame too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("frame must be a list, got prefix byte {0:#04x}")]
    NotAList(u8),
    #[error("signature does not match message")]
    BadSignature,
    #[error("crypto error: {0}")]
    Crypto(#[from] peersim_crypto::CryptoError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Errors that must abort the connection instead of dropping one frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::NotImplemented(_) | ProtocolError::UnknownExtension(_)
        )
    }
}

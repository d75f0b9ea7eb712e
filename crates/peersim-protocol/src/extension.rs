//! Capabilities negotiated after the handshake, and decoding of their payloads.

use serde::{Deserialize, Serialize};

use crate::block_sync::BlockSyncMessage;
use crate::parcel_sync::ParcelSyncMessage;
use crate::ProtocolError;

pub const BLOCK_PROPAGATION: &str = "block-propagation";
pub const PARCEL_PROPAGATION: &str = "parcel-propagation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    BlockPropagation,
    ParcelPropagation,
}

impl Capability {
    /// Capabilities requested by default, in negotiation order.
    pub const ALL: [Capability; 2] = [Capability::BlockPropagation, Capability::ParcelPropagation];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::BlockPropagation => BLOCK_PROPAGATION,
            Capability::ParcelPropagation => PARCEL_PROPAGATION,
        }
    }

    /// Extension version advertised for this capability.
    pub fn version(&self) -> u64 {
        0
    }

    pub fn from_name(name: &str) -> Result<Self, ProtocolError> {
        match name {
            BLOCK_PROPAGATION => Ok(Capability::BlockPropagation),
            PARCEL_PROPAGATION => Ok(Capability::ParcelPropagation),
            other => Err(ProtocolError::UnknownExtension(other.to_string())),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded payload of an extension message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    Block(BlockSyncMessage),
    Parcel(ParcelSyncMessage),
}

impl SyncMessage {
    pub fn capability(&self) -> Capability {
        match self {
            SyncMessage::Block(_) => Capability::BlockPropagation,
            SyncMessage::Parcel(_) => Capability::ParcelPropagation,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            SyncMessage::Block(m) => m.to_bytes(),
            SyncMessage::Parcel(m) => Ok(m.to_bytes()),
        }
    }

    /// Decode `data` with the codec registered for `extension_name`.
    pub fn decode(extension_name: &str, data: &[u8]) -> Result<Self, ProtocolError> {
        match Capability::from_name(extension_name)? {
            Capability::BlockPropagation => Ok(SyncMessage::Block(BlockSyncMessage::from_bytes(data)?)),
            Capability::ParcelPropagation => {
                Ok(SyncMessage::Parcel(ParcelSyncMessage::from_bytes(data)?))
            }
        }
    }
}

//! P2P frames exchanged over TCP after the session is established.
//!
//! Every frame on the wire is a [`SignedMessage`]: the encoded inner message
//! plus a keyed BLAKE2b-256 digest of it. The inner message is one of
//! handshake (`SYNC`, `ACK`), negotiation (`REQUEST`, `ALLOWED`, `DENIED`) or
//! extension (`ENCRYPTED`, `UNENCRYPTED`).

use primitive_types::H256;
use peersim_crypto::{blake256_with_key, SessionCipher};

use crate::value::{RlpError, Value};
use crate::session_message::NodeId;
use crate::{nonce_bytes, Nonce, ProtocolError, PROTOCOL_VERSION};

pub const SYNC_ID: u8 = 0;
pub const ACK_ID: u8 = 1;
pub const REQUEST_ID: u8 = 2;
pub const ALLOWED_ID: u8 = 3;
pub const DENIED_ID: u8 = 4;
pub const ENCRYPTED_ID: u8 = 5;
pub const UNENCRYPTED_ID: u8 = 6;

// ============================================================================
// Handshake
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    /// `[version, 0, port, node_id]`
    Sync {
        version: u64,
        port: u16,
        node_id: NodeId,
    },
    /// `[version, 1]`
    Ack { version: u64 },
}

impl HandshakeMessage {
    pub fn protocol_id(&self) -> u8 {
        match self {
            HandshakeMessage::Sync { .. } => SYNC_ID,
            HandshakeMessage::Ack { .. } => ACK_ID,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            HandshakeMessage::Sync {
                version,
                port,
                node_id,
            } => Value::List(vec![
                Value::from(*version),
                Value::from(SYNC_ID),
                Value::from(*port),
                node_id.to_value(),
            ]),
            HandshakeMessage::Ack { version } => {
                Value::List(vec![Value::from(*version), Value::from(ACK_ID)])
            }
        }
    }

    fn from_items(protocol_id: u8, items: &[Value]) -> Result<Self, ProtocolError> {
        let version = items[0].as_u64()?;
        match protocol_id {
            SYNC_ID => {
                let items = list_at_least(items, 4)?;
                Ok(HandshakeMessage::Sync {
                    version,
                    port: items[2].as_u16()?,
                    node_id: NodeId::from_value(&items[3])?,
                })
            }
            _ => Ok(HandshakeMessage::Ack { version }),
        }
    }
}

// ============================================================================
// Negotiation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationBody {
    /// `[version, 2, seq, name, [versions...]]`
    Request {
        extension_name: String,
        extension_versions: Vec<u64>,
    },
    /// `[version, 3, seq, version]`
    Allowed { version: u64 },
    /// `[version, 4, seq]`
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationMessage {
    pub version: u64,
    pub seq: u64,
    pub body: NegotiationBody,
}

impl NegotiationMessage {
    pub fn request(seq: u64, extension_name: impl Into<String>, extension_versions: Vec<u64>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            seq,
            body: NegotiationBody::Request {
                extension_name: extension_name.into(),
                extension_versions,
            },
        }
    }

    pub fn protocol_id(&self) -> u8 {
        match self.body {
            NegotiationBody::Request { .. } => REQUEST_ID,
            NegotiationBody::Allowed { .. } => ALLOWED_ID,
            NegotiationBody::Denied => DENIED_ID,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut items = vec![
            Value::from(self.version),
            Value::from(self.protocol_id()),
            Value::from(self.seq),
        ];
        match &self.body {
            NegotiationBody::Request {
                extension_name,
                extension_versions,
            } => {
                items.push(Value::from(extension_name.as_str()));
                items.push(Value::List(
                    extension_versions.iter().map(|v| Value::from(*v)).collect(),
                ));
            }
            NegotiationBody::Allowed { version } => items.push(Value::from(*version)),
            NegotiationBody::Denied => {}
        }
        Value::List(items)
    }

    fn from_items(protocol_id: u8, items: &[Value]) -> Result<Self, ProtocolError> {
        let items = list_at_least(items, 3)?;
        let body = match protocol_id {
            REQUEST_ID => {
                let items = list_at_least(items, 5)?;
                let extension_versions = items[4]
                    .as_list()?
                    .iter()
                    .map(Value::as_u64)
                    .collect::<Result<Vec<_>, _>>()?;
                NegotiationBody::Request {
                    extension_name: items[3].as_str()?.to_string(),
                    extension_versions,
                }
            }
            ALLOWED_ID => NegotiationBody::Allowed {
                version: list_at_least(items, 4)?[3].as_u64()?,
            },
            _ => NegotiationBody::Denied,
        };
        Ok(Self {
            version: items[0].as_u64()?,
            seq: items[2].as_u64()?,
            body,
        })
    }
}

// ============================================================================
// Extension
// ============================================================================

/// Application payload for a named capability.
///
/// `data` is exactly what travels on the wire: ciphertext when `encrypted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionMessage {
    pub version: u64,
    pub extension_name: String,
    pub extension_version: u64,
    pub encrypted: bool,
    pub data: Vec<u8>,
}

impl ExtensionMessage {
    pub fn unencrypted(extension_name: impl Into<String>, extension_version: u64, data: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            extension_name: extension_name.into(),
            extension_version,
            encrypted: false,
            data,
        }
    }

    /// Encrypt `plaintext` under the session cipher with the peer's nonce as IV.
    pub fn encrypted(
        extension_name: impl Into<String>,
        extension_version: u64,
        plaintext: &[u8],
        cipher: &SessionCipher,
        iv_nonce: Nonce,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            extension_name: extension_name.into(),
            extension_version,
            encrypted: true,
            data: cipher.encrypt(&nonce_bytes(iv_nonce), plaintext),
        }
    }

    /// Payload in the clear. Decrypts with `iv_nonce` when the message is encrypted.
    pub fn plaintext(&self, cipher: &SessionCipher, iv_nonce: Nonce) -> Result<Vec<u8>, ProtocolError> {
        if self.encrypted {
            Ok(cipher.decrypt(&nonce_bytes(iv_nonce), &self.data)?)
        } else {
            Ok(self.data.clone())
        }
    }

    pub fn protocol_id(&self) -> u8 {
        if self.encrypted {
            ENCRYPTED_ID
        } else {
            UNENCRYPTED_ID
        }
    }

    pub fn to_value(&self) -> Value {
        Value::List(vec![
            Value::from(self.version),
            Value::from(self.protocol_id()),
            Value::from(self.extension_name.as_str()),
            Value::from(self.extension_version),
            Value::from(self.data.as_slice()),
        ])
    }

    fn from_items(protocol_id: u8, items: &[Value]) -> Result<Self, ProtocolError> {
        let items = list_at_least(items, 5)?;
        Ok(Self {
            version: items[0].as_u64()?,
            extension_name: items[2].as_str()?.to_string(),
            extension_version: items[3].as_u64()?,
            encrypted: protocol_id == ENCRYPTED_ID,
            data: items[4].as_bytes()?.to_vec(),
        })
    }
}

// ============================================================================
// Inner message
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum P2pMessage {
    Handshake(HandshakeMessage),
    Negotiation(NegotiationMessage),
    Extension(ExtensionMessage),
}

impl P2pMessage {
    pub fn protocol_id(&self) -> u8 {
        match self {
            P2pMessage::Handshake(m) => m.protocol_id(),
            P2pMessage::Negotiation(m) => m.protocol_id(),
            P2pMessage::Extension(m) => m.protocol_id(),
        }
    }

    /// Wire name, for logs and errors.
    pub fn name(&self) -> &'static str {
        match self.protocol_id() {
            SYNC_ID => "SYNC",
            ACK_ID => "ACK",
            REQUEST_ID => "REQUEST",
            ALLOWED_ID => "ALLOWED",
            DENIED_ID => "DENIED",
            ENCRYPTED_ID => "ENCRYPTED",
            _ => "UNENCRYPTED",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            P2pMessage::Handshake(m) => m.to_value(),
            P2pMessage::Negotiation(m) => m.to_value(),
            P2pMessage::Extension(m) => m.to_value(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_value().to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value = Value::from_bytes(bytes)?;
        let items = value.list_at_least(2)?;
        let protocol_id = items[1].as_u8()?;
        match protocol_id {
            SYNC_ID | ACK_ID => Ok(P2pMessage::Handshake(HandshakeMessage::from_items(
                protocol_id,
                items,
            )?)),
            REQUEST_ID | ALLOWED_ID | DENIED_ID => Ok(P2pMessage::Negotiation(
                NegotiationMessage::from_items(protocol_id, items)?,
            )),
            ENCRYPTED_ID | UNENCRYPTED_ID => Ok(P2pMessage::Extension(
                ExtensionMessage::from_items(protocol_id, items)?,
            )),
            id => Err(ProtocolError::UnknownMessageId {
                kind: "p2p",
                id: u64::from(id),
            }),
        }
    }
}

fn list_at_least(items: &[Value], min: usize) -> Result<&[Value], RlpError> {
    if items.len() < min {
        return Err(RlpError::ListTooShort {
            min,
            got: items.len(),
        });
    }
    Ok(items)
}

// ============================================================================
// Signed envelope
// ============================================================================

/// `[encoded_inner_message, blake256_with_key(encoded_inner_message, nonce)]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub message: Vec<u8>,
    pub signature: H256,
}

impl SignedMessage {
    /// Encode `message` once and sign it with `nonce`.
    pub fn sign(message: &P2pMessage, nonce: Nonce) -> Result<Self, ProtocolError> {
        let message = message.to_bytes();
        let signature = H256(blake256_with_key(&message, &nonce_bytes(nonce))?);
        Ok(Self { message, signature })
    }

    pub fn verify(&self, nonce: Nonce) -> Result<(), ProtocolError> {
        let expected = blake256_with_key(&self.message, &nonce_bytes(nonce))?;
        if expected != self.signature.0 {
            return Err(ProtocolError::BadSignature);
        }
        Ok(())
    }

    /// Decode the inner message. Does not check the signature.
    pub fn inner(&self) -> Result<P2pMessage, ProtocolError> {
        P2pMessage::from_bytes(&self.message)
    }

    pub fn to_value(&self) -> Value {
        Value::List(vec![
            Value::from(self.message.as_slice()),
            Value::from(self.signature),
        ])
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_value().to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value = Value::from_bytes(bytes)?;
        let items = value.list_of(2)?;
        Ok(Self {
            message: items[0].as_bytes()?.to_vec(),
            signature: items[1].as_h256()?,
        })
    }
}

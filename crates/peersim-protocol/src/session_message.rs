//! UDP session handshake messages.
//!
//! Sequenced wire shape: `[version, seq, protocol_id, body]`.
//! Legacy wire shape:    `[version, protocol_id, body]`.
//! Decoding accepts either and records which one it saw.

use std::net::Ipv4Addr;

use primitive_types::H512;
use serde::{Deserialize, Serialize};

use crate::value::{RlpError, Value};
use crate::{ProtocolError, PROTOCOL_VERSION};

pub const NODE_ID_REQUEST: u8 = 1;
pub const NODE_ID_RESPONSE: u8 = 2;
pub const SECRET_REQUEST: u8 = 3;
pub const SECRET_ALLOWED: u8 = 4;
pub const SECRET_DENIED: u8 = 5;
pub const NONCE_REQUEST: u8 = 6;
pub const NONCE_ALLOWED: u8 = 7;
pub const NONCE_DENIED: u8 = 8;

/// Largest datagram the session layer sends or accepts.
pub const MAX_PACKET_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionWireFormat {
    /// `[version, seq, protocol_id, body]`
    #[default]
    Sequenced,
    /// `[version, protocol_id, body]`
    Legacy,
}

/// IPv4 endpoint as carried on the wire: `[a, b, c, d, port]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl NodeId {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn to_value(&self) -> Value {
        let mut items: Vec<Value> = self.ip.octets().iter().map(|o| Value::from(*o)).collect();
        items.push(Value::from(self.port));
        Value::List(items)
    }

    pub fn from_value(value: &Value) -> Result<Self, RlpError> {
        let items = value.list_of(5)?;
        let ip = Ipv4Addr::new(
            items[0].as_u8()?,
            items[1].as_u8()?,
            items[2].as_u8()?,
            items[3].as_u8()?,
        );
        Ok(Self {
            ip,
            port: items[4].as_u16()?,
        })
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionBody {
    NodeIdRequest(NodeId),
    NodeIdResponse(NodeId),
    /// Initiator's ephemeral public key.
    SecretRequest(H512),
    /// Responder's ephemeral public key.
    SecretAllowed(H512),
    SecretDenied(String),
    /// Encrypted nonce of the sender.
    NonceRequest(Vec<u8>),
    NonceAllowed(Vec<u8>),
    NonceDenied(String),
}

impl SessionBody {
    pub fn protocol_id(&self) -> u8 {
        match self {
            SessionBody::NodeIdRequest(_) => NODE_ID_REQUEST,
            SessionBody::NodeIdResponse(_) => NODE_ID_RESPONSE,
            SessionBody::SecretRequest(_) => SECRET_REQUEST,
            SessionBody::SecretAllowed(_) => SECRET_ALLOWED,
            SessionBody::SecretDenied(_) => SECRET_DENIED,
            SessionBody::NonceRequest(_) => NONCE_REQUEST,
            SessionBody::NonceAllowed(_) => NONCE_ALLOWED,
            SessionBody::NonceDenied(_) => NONCE_DENIED,
        }
    }

    /// Wire name, for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            SessionBody::NodeIdRequest(_) => "NODE_ID_REQUEST",
            SessionBody::NodeIdResponse(_) => "NODE_ID_RESPONSE",
            SessionBody::SecretRequest(_) => "SECRET_REQUEST",
            SessionBody::SecretAllowed(_) => "SECRET_ALLOWED",
            SessionBody::SecretDenied(_) => "SECRET_DENIED",
            SessionBody::NonceRequest(_) => "NONCE_REQUEST",
            SessionBody::NonceAllowed(_) => "NONCE_ALLOWED",
            SessionBody::NonceDenied(_) => "NONCE_DENIED",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            SessionBody::NodeIdRequest(id) | SessionBody::NodeIdResponse(id) => id.to_value(),
            SessionBody::SecretRequest(key) | SessionBody::SecretAllowed(key) => Value::from(*key),
            SessionBody::SecretDenied(reason) | SessionBody::NonceDenied(reason) => {
                Value::from(reason.as_str())
            }
            SessionBody::NonceRequest(data) | SessionBody::NonceAllowed(data) => {
                Value::from(data.as_slice())
            }
        }
    }

    pub fn from_value(protocol_id: u8, value: &Value) -> Result<Self, ProtocolError> {
        let body = match protocol_id {
            NODE_ID_REQUEST => SessionBody::NodeIdRequest(NodeId::from_value(value)?),
            NODE_ID_RESPONSE => SessionBody::NodeIdResponse(NodeId::from_value(value)?),
            SECRET_REQUEST => SessionBody::SecretRequest(value.as_h512()?),
            SECRET_ALLOWED => SessionBody::SecretAllowed(value.as_h512()?),
            SECRET_DENIED => SessionBody::SecretDenied(value.as_str()?.to_string()),
            NONCE_REQUEST => SessionBody::NonceRequest(value.as_bytes()?.to_vec()),
            NONCE_ALLOWED => SessionBody::NonceAllowed(value.as_bytes()?.to_vec()),
            NONCE_DENIED => SessionBody::NonceDenied(value.as_str()?.to_string()),
            id => {
                return Err(ProtocolError::UnknownMessageId {
                    kind: "session",
                    id: u64::from(id),
                })
            }
        };
        Ok(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMessage {
    pub version: u64,
    /// Always 0 in the legacy shape.
    pub seq: u64,
    pub format: SessionWireFormat,
    pub body: SessionBody,
}

impl SessionMessage {
    pub fn new(seq: u64, body: SessionBody) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            seq,
            format: SessionWireFormat::Sequenced,
            body,
        }
    }

    pub fn legacy(body: SessionBody) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            seq: 0,
            format: SessionWireFormat::Legacy,
            body,
        }
    }

    /// Build a message in the given wire shape.
    pub fn with_format(format: SessionWireFormat, seq: u64, body: SessionBody) -> Self {
        match format {
            SessionWireFormat::Sequenced => Self::new(seq, body),
            SessionWireFormat::Legacy => Self::legacy(body),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut items = vec![Value::from(self.version)];
        if self.format == SessionWireFormat::Sequenced {
            items.push(Value::from(self.seq));
        }
        items.push(Value::from(self.body.protocol_id()));
        items.push(self.body.to_value());
        Value::List(items)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_value().to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_value(&Value::from_bytes(bytes)?)
    }

    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let items = value.as_list()?;
        let (format, seq, id_index) = match items.len() {
            4 => (SessionWireFormat::Sequenced, items[1].as_u64()?, 2),
            3 => (SessionWireFormat::Legacy, 0, 1),
            got => return Err(RlpError::ListLength { expected: 4, got }.into()),
        };
        let protocol_id = items[id_index].as_u8()?;
        Ok(Self {
            version: items[0].as_u64()?,
            seq,
            format,
            body: SessionBody::from_value(protocol_id, &items[id_index + 1])?,
        })
    }
}

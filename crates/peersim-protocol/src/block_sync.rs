//! Block propagation extension messages.
//!
//! - Status: `[1, [total_score, best_hash, genesis_hash]]`
//! - Request / response: `[message_id, request_id, payload]`

use primitive_types::{H256, U256};

use crate::header::Header;
use crate::value::Value;
use crate::ProtocolError;

pub const MESSAGE_ID_STATUS: u8 = 0x01;
pub const MESSAGE_ID_GET_HEADERS: u8 = 0x02;
pub const MESSAGE_ID_HEADERS: u8 = 0x03;
pub const MESSAGE_ID_GET_BODIES: u8 = 0x04;
pub const MESSAGE_ID_BODIES: u8 = 0x05;
pub const MESSAGE_ID_GET_STATE_HEAD: u8 = 0x06;
pub const MESSAGE_ID_STATE_HEAD: u8 = 0x07;
pub const MESSAGE_ID_GET_STATE_CHUNK: u8 = 0x08;
pub const MESSAGE_ID_STATE_CHUNK: u8 = 0x09;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSyncMessage {
    Status {
        total_score: U256,
        best_hash: H256,
        genesis_hash: H256,
    },
    Request {
        id: u64,
        message: RequestMessage,
    },
    Response {
        id: u64,
        message: ResponseMessage,
    },
}

impl BlockSyncMessage {
    pub fn message_id(&self) -> u8 {
        match self {
            BlockSyncMessage::Status { .. } => MESSAGE_ID_STATUS,
            BlockSyncMessage::Request { message, .. } => message.message_id(),
            BlockSyncMessage::Response { message, .. } => message.message_id(),
        }
    }

    /// Fails with `NotImplemented` for the state head/chunk variants.
    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        let value = match self {
            BlockSyncMessage::Status {
                total_score,
                best_hash,
                genesis_hash,
            } => Value::List(vec![
                Value::from(MESSAGE_ID_STATUS),
                Value::List(vec![
                    Value::from(*total_score),
                    Value::from(*best_hash),
                    Value::from(*genesis_hash),
                ]),
            ]),
            BlockSyncMessage::Request { id, message } => Value::List(vec![
                Value::from(message.message_id()),
                Value::from(*id),
                message.to_value()?,
            ]),
            BlockSyncMessage::Response { id, message } => Value::List(vec![
                Value::from(message.message_id()),
                Value::from(*id),
                message.to_value()?,
            ]),
        };
        Ok(value)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.to_value()?.to_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_value(&Value::from_bytes(bytes)?)
    }

    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let items = value.list_at_least(2)?;
        let message_id = items[0].as_u8()?;
        if message_id == MESSAGE_ID_STATUS {
            let status = items[1].list_of(3)?;
            return Ok(BlockSyncMessage::Status {
                total_score: status[0].as_u256()?,
                best_hash: status[1].as_h256()?,
                genesis_hash: status[2].as_h256()?,
            });
        }

        let items = value.list_of(3)?;
        let id = items[1].as_u64()?;
        match message_id {
            MESSAGE_ID_GET_HEADERS
            | MESSAGE_ID_GET_BODIES
            | MESSAGE_ID_GET_STATE_HEAD
            | MESSAGE_ID_GET_STATE_CHUNK => Ok(BlockSyncMessage::Request {
                id,
                message: RequestMessage::decode(message_id, &items[2])?,
            }),
            MESSAGE_ID_HEADERS | MESSAGE_ID_BODIES | MESSAGE_ID_STATE_HEAD | MESSAGE_ID_STATE_CHUNK => {
                Ok(BlockSyncMessage::Response {
                    id,
                    message: ResponseMessage::decode(message_id, &items[2])?,
                })
            }
            other => Err(ProtocolError::UnknownMessageId {
                kind: "block sync",
                id: u64::from(other),
            }),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMessage {
    /// `[start_number, max_count]`
    Headers { start_number: u64, max_count: u64 },
    /// `[hash, ...]`
    Bodies(Vec<H256>),
    /// Reserved by the wire format, never encoded or decoded.
    StateHead,
    /// Reserved by the wire format, never encoded or decoded.
    StateChunk,
}

impl RequestMessage {
    pub fn message_id(&self) -> u8 {
        match self {
            RequestMessage::Headers { .. } => MESSAGE_ID_GET_HEADERS,
            RequestMessage::Bodies(_) => MESSAGE_ID_GET_BODIES,
            RequestMessage::StateHead => MESSAGE_ID_GET_STATE_HEAD,
            RequestMessage::StateChunk => MESSAGE_ID_GET_STATE_CHUNK,
        }
    }

    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        match self {
            RequestMessage::Headers {
                start_number,
                max_count,
            } => Ok(Value::List(vec![
                Value::from(*start_number),
                Value::from(*max_count),
            ])),
            RequestMessage::Bodies(hashes) => Ok(Value::List(
                hashes.iter().map(|h| Value::from(*h)).collect(),
            )),
            RequestMessage::StateHead => Err(ProtocolError::NotImplemented("state head request")),
            RequestMessage::StateChunk => Err(ProtocolError::NotImplemented("state chunk request")),
        }
    }

    pub fn decode(message_id: u8, value: &Value) -> Result<Self, ProtocolError> {
        match message_id {
            MESSAGE_ID_GET_HEADERS => {
                let items = value.list_of(2)?;
                Ok(RequestMessage::Headers {
                    start_number: items[0].as_u64()?,
                    max_count: items[1].as_u64()?,
                })
            }
            MESSAGE_ID_GET_BODIES => Ok(RequestMessage::Bodies(
                value
                    .as_list()?
                    .iter()
                    .map(Value::as_h256)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            MESSAGE_ID_GET_STATE_HEAD => Err(ProtocolError::NotImplemented("state head request")),
            MESSAGE_ID_GET_STATE_CHUNK => Err(ProtocolError::NotImplemented("state chunk request")),
            other => Err(ProtocolError::UnknownMessageId {
                kind: "block sync request",
                id: u64::from(other),
            }),
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseMessage {
    /// Encoded headers, one list per header.
    Headers(Vec<Value>),
    /// One transaction list per requested body.
    Bodies(Vec<Vec<Value>>),
    /// Reserved by the wire format, never encoded or decoded.
    StateHead,
    /// Reserved by the wire format, never encoded or decoded.
    StateChunk,
}

impl ResponseMessage {
    pub fn headers(headers: &[Header]) -> Self {
        ResponseMessage::Headers(headers.iter().map(Header::to_value).collect())
    }

    pub fn message_id(&self) -> u8 {
        match self {
            ResponseMessage::Headers(_) => MESSAGE_ID_HEADERS,
            ResponseMessage::Bodies(_) => MESSAGE_ID_BODIES,
            ResponseMessage::StateHead => MESSAGE_ID_STATE_HEAD,
            ResponseMessage::StateChunk => MESSAGE_ID_STATE_CHUNK,
        }
    }

    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        match self {
            ResponseMessage::Headers(headers) => Ok(Value::List(headers.clone())),
            ResponseMessage::Bodies(bodies) => Ok(Value::List(
                bodies.iter().map(|body| Value::List(body.clone())).collect(),
            )),
            ResponseMessage::StateHead => Err(ProtocolError::NotImplemented("state head response")),
            ResponseMessage::StateChunk => Err(ProtocolError::NotImplemented("state chunk response")),
        }
    }

    pub fn decode(message_id: u8, value: &Value) -> Result<Self, ProtocolError> {
        match message_id {
            MESSAGE_ID_HEADERS => Ok(ResponseMessage::Headers(value.as_list()?.to_vec())),
            MESSAGE_ID_BODIES => Ok(ResponseMessage::Bodies(
                value
                    .as_list()?
                    .iter()
                    .map(|body| body.as_list().map(<[Value]>::to_vec))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            MESSAGE_ID_STATE_HEAD => Err(ProtocolError::NotImplemented("state head response")),
            MESSAGE_ID_STATE_CHUNK => Err(ProtocolError::NotImplemented("state chunk response")),
            other => Err(ProtocolError::UnknownMessageId {
                kind: "block sync response",
                id: u64::from(other),
            }),
        }
    }

    /// Parse a headers response into typed headers.
    pub fn decode_headers(&self) -> Result<Vec<Header>, ProtocolError> {
        match self {
            ResponseMessage::Headers(values) => values
                .iter()
                .map(|v| Header::from_value(v).map_err(ProtocolError::from))
                .collect(),
            other => Err(ProtocolError::UnexpectedResponse {
                expected: MESSAGE_ID_HEADERS,
                got: other.message_id(),
            }),
        }
    }
}

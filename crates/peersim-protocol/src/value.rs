//! Dynamic RLP value tree.
//!
//! Every layer of the wire protocol is RLP, but payloads are heterogeneous
//! (extension data, parcels, header seals), so messages are assembled as a
//! [`Value`] tree of byte strings and lists. The byte-level work is done by
//! the `rlp` crate: [`Value`] implements `Encodable`, decoding walks an
//! `Rlp` view, and the scalar accessors go through the crate's `Decodable`
//! integer impls.
//!
//! Accessors treat an empty string as zero, for integers and fixed hashes
//! alike.

use primitive_types::{H128, H160, H256, H512, U256};
use rlp::{Decodable, DecoderError, Encodable, PayloadInfo, Rlp, RlpStream};

/// Nesting limit when decoding untrusted input.
const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RlpError {
    #[error("incomplete data")]
    Incomplete,
    #[error("invalid data: {0}")]
    Invalid(DecoderError),
    #[error("{0} trailing bytes after item")]
    TrailingBytes(usize),
    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,
    #[error("expected a byte string, found a list")]
    ExpectedBytes,
    #[error("expected a list, found a byte string")]
    ExpectedList,
    #[error("expected a list of {expected} items, found {got}")]
    ListLength { expected: usize, got: usize },
    #[error("expected at least {min} list items, found {got}")]
    ListTooShort { min: usize, got: usize },
    #[error("fixed-size value must be {expected} bytes, found {got}")]
    FixedLength { expected: usize, got: usize },
    #[error("string is not valid utf-8")]
    InvalidUtf8,
}

impl RlpError {
    /// True when more input could turn this into a successful decode.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, RlpError::Incomplete)
    }
}

impl From<DecoderError> for RlpError {
    fn from(e: DecoderError) -> Self {
        match e {
            DecoderError::RlpIsTooShort => RlpError::Incomplete,
            other => RlpError::Invalid(other),
        }
    }
}

// ============================================================================
// Value tree
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Bytes(Vec<u8>),
    List(Vec<Value>),
}

impl Value {
    /// The empty string, which is also the encoding of integer zero.
    pub fn empty() -> Self {
        Value::Bytes(Vec::new())
    }

    pub fn empty_list() -> Self {
        Value::List(Vec::new())
    }

    /// Byte string holding the payload `item` encodes to.
    fn scalar<E: Encodable>(item: &E) -> Self {
        let encoded = rlp::encode(item);
        Rlp::new(&encoded)
            .data()
            .map_or_else(|_| Value::empty(), |data| Value::Bytes(data.to_vec()))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    pub fn as_bytes(&self) -> Result<&[u8], RlpError> {
        match self {
            Value::Bytes(b) => Ok(b),
            Value::List(_) => Err(RlpError::ExpectedBytes),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, RlpError> {
        match self {
            Value::Bytes(b) => Ok(b),
            Value::List(_) => Err(RlpError::ExpectedBytes),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], RlpError> {
        match self {
            Value::List(items) => Ok(items),
            Value::Bytes(_) => Err(RlpError::ExpectedList),
        }
    }

    pub fn into_list(self) -> Result<Vec<Value>, RlpError> {
        match self {
            Value::List(items) => Ok(items),
            Value::Bytes(_) => Err(RlpError::ExpectedList),
        }
    }

    /// List with exactly `len` items.
    pub fn list_of(&self, len: usize) -> Result<&[Value], RlpError> {
        let items = self.as_list()?;
        if items.len() != len {
            return Err(RlpError::ListLength {
                expected: len,
                got: items.len(),
            });
        }
        Ok(items)
    }

    /// List with at least `min` items.
    pub fn list_at_least(&self, min: usize) -> Result<&[Value], RlpError> {
        let items = self.as_list()?;
        if items.len() < min {
            return Err(RlpError::ListTooShort {
                min,
                got: items.len(),
            });
        }
        Ok(items)
    }

    fn scalar_as<T: Decodable>(&self) -> Result<T, RlpError> {
        self.as_bytes()?;
        Ok(rlp::decode(&self.to_bytes())?)
    }

    pub fn as_u8(&self) -> Result<u8, RlpError> {
        self.scalar_as()
    }

    pub fn as_u16(&self) -> Result<u16, RlpError> {
        self.scalar_as()
    }

    pub fn as_u64(&self) -> Result<u64, RlpError> {
        self.scalar_as()
    }

    pub fn as_u128(&self) -> Result<u128, RlpError> {
        self.scalar_as()
    }

    pub fn as_u256(&self) -> Result<U256, RlpError> {
        self.scalar_as()
    }

    /// Fixed-width string. Empty decodes to all zeroes.
    fn fixed<const N: usize>(&self) -> Result<[u8; N], RlpError> {
        let bytes = self.as_bytes()?;
        let mut out = [0u8; N];
        match bytes.len() {
            0 => Ok(out),
            len if len == N => {
                out.copy_from_slice(bytes);
                Ok(out)
            }
            got => Err(RlpError::FixedLength { expected: N, got }),
        }
    }

    pub fn as_h128(&self) -> Result<H128, RlpError> {
        Ok(H128(self.fixed::<16>()?))
    }

    pub fn as_h160(&self) -> Result<H160, RlpError> {
        Ok(H160(self.fixed::<20>()?))
    }

    pub fn as_h256(&self) -> Result<H256, RlpError> {
        Ok(H256(self.fixed::<32>()?))
    }

    pub fn as_h512(&self) -> Result<H512, RlpError> {
        Ok(H512(self.fixed::<64>()?))
    }

    pub fn as_str(&self) -> Result<&str, RlpError> {
        std::str::from_utf8(self.as_bytes()?).map_err(|_| RlpError::InvalidUtf8)
    }

    /// Canonical encoding of this value.
    pub fn to_bytes(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    /// Decode a buffer holding exactly one item.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, RlpError> {
        let rlp = Rlp::new(buf);
        let total = rlp.payload_info()?.total();
        if total != buf.len() {
            return Err(RlpError::TrailingBytes(buf.len() - total));
        }
        decode_item(&rlp, 0)
    }
}

impl Encodable for Value {
    fn rlp_append(&self, s: &mut RlpStream) {
        match self {
            Value::Bytes(b) => {
                s.append(b);
            }
            Value::List(items) => {
                s.begin_list(items.len());
                for item in items {
                    s.append(item);
                }
            }
        }
    }
}

fn decode_item(rlp: &Rlp, depth: usize) -> Result<Value, RlpError> {
    if depth > MAX_DEPTH {
        return Err(RlpError::TooDeep);
    }
    if !rlp.is_list() {
        return Ok(Value::Bytes(rlp.as_val()?));
    }

    // Item iteration stops at the first malformed child, so the children
    // must account for the whole payload.
    let payload_len = rlp.payload_info()?.value_len;
    let count = rlp.item_count()?;
    let mut items = Vec::with_capacity(count);
    let mut used = 0;
    for index in 0..count {
        let child = rlp.at(index)?;
        used += child.as_raw().len();
        items.push(decode_item(&child, depth + 1)?);
    }
    if used != payload_len {
        return Err(RlpError::Invalid(DecoderError::RlpInconsistentLengthAndData));
    }
    Ok(Value::List(items))
}

/// Total byte length of the first encoded item in `buf`, read from its
/// prefix alone. The buffer may hold fewer bytes than this.
pub fn frame_length(buf: &[u8]) -> Result<usize, RlpError> {
    let info = PayloadInfo::from(buf)?;
    info.header_len
        .checked_add(info.value_len)
        .ok_or(RlpError::Invalid(DecoderError::RlpInvalidLength))
}

macro_rules! impl_from_scalar {
    ($($t:ty),*) => {$(
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::scalar(&v)
            }
        }
    )*};
}

impl_from_scalar!(u8, u16, u32, u64, u128, U256);

macro_rules! impl_from_hash {
    ($($t:ty),*) => {$(
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Bytes(v.as_bytes().to_vec())
            }
        }
    )*};
}

impl_from_hash!(H128, H160, H256, H512);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Bytes(s.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

//! Block header value type.
//!
//! Headers are immutable: the hash is computed when a header is built and
//! every `with_*` method returns a new, rehashed header.
//!
//! Encoding order: `[parent_hash, author, state_root, parcels_root,
//! invoice_root, score, number, timestamp, extra_data, seal...]`.

use primitive_types::{H160, H256, U256};
use peersim_crypto::blake256;

use crate::value::{RlpError, Value};

/// Digest of the encoding of an empty string (the root of an empty trie).
pub const BLAKE_NULL_RLP: H256 = H256([
    0x45, 0xb0, 0xcf, 0xc2, 0x20, 0xce, 0xec, 0x5b, 0x7c, 0x1c, 0x62, 0xc4, 0xd4, 0x19, 0x3d, 0x38,
    0xe4, 0xeb, 0xa4, 0x8e, 0x88, 0x15, 0x72, 0x9c, 0xe7, 0x5f, 0x9c, 0x0a, 0xb0, 0xe4, 0xc1, 0xc0,
]);

/// Fields before the seal entries.
const BARE_FIELD_COUNT: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    parent_hash: H256,
    timestamp: u64,
    number: u64,
    author: H160,
    extra_data: Vec<u8>,
    parcels_root: H256,
    state_root: H256,
    invoice_root: H256,
    score: U256,
    seal: Vec<Vec<u8>>,
    hash: H256,
}

impl Default for Header {
    fn default() -> Self {
        let mut header = Self {
            parent_hash: H256::zero(),
            timestamp: 0,
            number: 0,
            author: H160::zero(),
            extra_data: Vec::new(),
            parcels_root: BLAKE_NULL_RLP,
            state_root: BLAKE_NULL_RLP,
            invoice_root: BLAKE_NULL_RLP,
            score: U256::zero(),
            seal: Vec::new(),
            hash: H256::zero(),
        };
        header.hash = header.hashing();
        header
    }
}

macro_rules! with_field {
    ($(#[$doc:meta])* $method:ident, $field:ident: $ty:ty) => {
        $(#[$doc])*
        pub fn $method(mut self, $field: $ty) -> Self {
            self.$field = $field;
            self.hash = self.hashing();
            self
        }
    };
}

impl Header {
    with_field!(with_parent_hash, parent_hash: H256);
    with_field!(with_timestamp, timestamp: u64);
    with_field!(with_number, number: u64);
    with_field!(with_author, author: H160);
    with_field!(with_extra_data, extra_data: Vec<u8>);
    with_field!(with_parcels_root, parcels_root: H256);
    with_field!(with_state_root, state_root: H256);
    with_field!(with_invoice_root, invoice_root: H256);
    with_field!(with_score, score: U256);
    with_field!(
        /// Replace the seal entries, each encoded as a byte string.
        with_seal, seal: Vec<Vec<u8>>
    );

    pub fn parent_hash(&self) -> H256 {
        self.parent_hash
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn author(&self) -> H160 {
        self.author
    }

    pub fn extra_data(&self) -> &[u8] {
        &self.extra_data
    }

    pub fn parcels_root(&self) -> H256 {
        self.parcels_root
    }

    pub fn state_root(&self) -> H256 {
        self.state_root
    }

    pub fn invoice_root(&self) -> H256 {
        self.invoice_root
    }

    pub fn score(&self) -> U256 {
        self.score
    }

    pub fn seal(&self) -> &[Vec<u8>] {
        &self.seal
    }

    /// Hash computed when this header was built.
    pub fn hash(&self) -> H256 {
        self.hash
    }

    /// Digest of the full encoding, seal included. Pure; does not touch the cached hash.
    pub fn hashing(&self) -> H256 {
        H256(blake256(&self.rlp_bytes()))
    }

    /// Digest of the encoding without the seal.
    pub fn bare_hash(&self) -> H256 {
        H256(blake256(&Value::List(self.bare_items()).to_bytes()))
    }

    fn bare_items(&self) -> Vec<Value> {
        vec![
            Value::from(self.parent_hash),
            Value::from(self.author),
            Value::from(self.state_root),
            Value::from(self.parcels_root),
            Value::from(self.invoice_root),
            Value::from(self.score),
            Value::from(self.number),
            Value::from(self.timestamp),
            Value::from(self.extra_data.as_slice()),
        ]
    }

    pub fn to_value(&self) -> Value {
        let mut items = self.bare_items();
        items.extend(self.seal.iter().map(|s| Value::from(s.as_slice())));
        Value::List(items)
    }

    pub fn rlp_bytes(&self) -> Vec<u8> {
        self.to_value().to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RlpError> {
        Self::from_value(&Value::from_bytes(bytes)?)
    }

    pub fn from_value(value: &Value) -> Result<Self, RlpError> {
        let items = value.list_at_least(BARE_FIELD_COUNT)?;
        let seal = items[BARE_FIELD_COUNT..]
            .iter()
            .map(|s| s.as_bytes().map(<[u8]>::to_vec))
            .collect::<Result<Vec<_>, _>>()?;
        let mut header = Self {
            parent_hash: items[0].as_h256()?,
            author: items[1].as_h160()?,
            state_root: items[2].as_h256()?,
            parcels_root: items[3].as_h256()?,
            invoice_root: items[4].as_h256()?,
            score: items[5].as_u256()?,
            number: items[6].as_u64()?,
            timestamp: items[7].as_u64()?,
            extra_data: items[8].as_bytes()?.to_vec(),
            seal,
            hash: H256::zero(),
        };
        header.hash = header.hashing();
        Ok(header)
    }
}

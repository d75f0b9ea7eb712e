//! Parcel (transaction) propagation extension message: a bare list of
//! encoded transactions.

use crate::value::Value;
use crate::ProtocolError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParcelSyncMessage {
    /// Transactions as opaque encoded values.
    pub parcels: Vec<Value>,
}

impl ParcelSyncMessage {
    pub fn new(parcels: Vec<Value>) -> Self {
        Self { parcels }
    }

    pub fn to_value(&self) -> Value {
        Value::List(self.parcels.clone())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_value().to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(Self {
            parcels: Value::from_bytes(bytes)?.into_list()?,
        })
    }
}

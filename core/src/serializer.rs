//! State serializers.
//!
//! A [`StateSerializer`] round-trips aggregate state for snapshots and the
//! persisted outbox. [`BincodeSerializer`] is the default; [`JsonSerializer`]
//! trades size for readability.

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Failure to encode or decode a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    /// The value could not be encoded.
    #[error("Failed to serialize: {0}")]
    Encode(String),

    /// The bytes could not be decoded.
    #[error("Failed to deserialize: {0}")]
    Decode(String),
}

/// Round-trips values through bytes.
pub trait StateSerializer: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Encode a value.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::Encode`] if the value cannot be encoded.
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError>;

    /// Decode a value.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::Decode`] if the bytes are not a valid `T`.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError>;

    /// Produce a structurally independent copy by serializing and deserializing.
    ///
    /// # Errors
    ///
    /// Propagates either direction's failure.
    fn deep_copy<T: Serialize + DeserializeOwned>(&self, value: &T) -> Result<T, SerializationError> {
        let bytes = self.serialize(value)?;
        self.deserialize(&bytes)
    }
}

/// Compact binary encoding using `bincode`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeSerializer;

impl StateSerializer for BincodeSerializer {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        bincode::serialize(value).map_err(|e| SerializationError::Encode(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        bincode::deserialize(bytes).map_err(|e| SerializationError::Decode(e.to_string()))
    }
}

/// Human-readable encoding using `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl StateSerializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(value).map_err(|e| SerializationError::Encode(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        serde_json::from_slice(bytes).map_err(|e| SerializationError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ledger {
        owner: String,
        entries: BTreeMap<String, i64>,
    }

    fn ledger() -> Ledger {
        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), 10);
        entries.insert("b".to_string(), -3);
        Ledger {
            owner: "acc-1".to_string(),
            entries,
        }
    }

    #[test]
    fn deep_copy_is_independent() {
        let original = ledger();
        let mut copy = BincodeSerializer.deep_copy(&original).expect("copy");
        copy.entries.insert("c".to_string(), 1);

        assert_eq!(original.entries.len(), 2);
        assert_eq!(copy.entries.len(), 3);
    }

    #[test]
    fn json_is_readable() {
        let bytes = JsonSerializer.serialize(&ledger()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"owner\":\"acc-1\""));
    }

    #[test]
    fn decode_failure_is_reported() {
        let err = JsonSerializer.deserialize::<Ledger>(b"not json").unwrap_err();
        assert!(matches!(err, SerializationError::Decode(_)));

        let err = BincodeSerializer.deserialize::<Ledger>(&[1]).unwrap_err();
        assert!(matches!(err, SerializationError::Decode(_)));
    }
}

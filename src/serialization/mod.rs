//! Value serialization
//!
//! Application values are JSON documents. The store never looks inside the
//! serialized bytes except to compare them for duplicate-version
//! elimination, so any manager that round-trips `serde_json::Value` works.
//!
//! A serialized value is never zero-length: the matrix reserves empty bytes
//! for tombstones.

use std::fmt;

use serde_json::Value;

use crate::error::{ChronoError, ChronoResult};

/// Converts values to and from stored bytes.
pub trait SerializationManager: Send + Sync + fmt::Debug {
    fn serialize(&self, value: &Value) -> ChronoResult<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> ChronoResult<Value>;
}

/// Compact JSON encoding
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializationManager;

impl SerializationManager for JsonSerializationManager {
    fn serialize(&self, value: &Value) -> ChronoResult<Vec<u8>> {
        // `null` still encodes as four bytes, so the tombstone encoding
        // cannot collide with a stored value.
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> ChronoResult<Value> {
        if bytes.is_empty() {
            return Err(ChronoError::Corruption(
                "attempted to deserialize a tombstone".to_string(),
            ));
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Serde helper storing optional byte payloads as base64 strings.
///
/// Used by the WAL token and dump formats, which are JSON.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_document() {
        let manager = JsonSerializationManager;
        let value = json!({"name": "Hello", "tags": ["a", "b"], "n": 3});
        let bytes = manager.serialize(&value).unwrap();
        assert_eq!(manager.deserialize(&bytes).unwrap(), value);
    }

    #[test]
    fn test_null_is_not_zero_length() {
        let manager = JsonSerializationManager;
        assert!(!manager.serialize(&Value::Null).unwrap().is_empty());
        assert!(!manager.serialize(&json!("")).unwrap().is_empty());
    }

    #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
    struct Payload {
        #[serde(with = "base64_bytes", default)]
        bytes: Option<Vec<u8>>,
    }

    #[test]
    fn test_base64_bytes_field() {
        let payload = Payload { bytes: Some(vec![0, 1, 255]) };
        let text = serde_json::to_string(&payload).unwrap();
        assert_eq!(text, r#"{"bytes":"AAH/"}"#);
        assert_eq!(serde_json::from_str::<Payload>(&text).unwrap(), payload);
        let none: Payload = serde_json::from_str(r#"{"bytes":null}"#).unwrap();
        assert_eq!(none.bytes, None);
    }

    #[test]
    fn test_deserialize_empty_is_rejected() {
        let manager = JsonSerializationManager;
        assert!(manager.deserialize(&[]).is_err());
    }
}

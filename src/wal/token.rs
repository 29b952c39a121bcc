//! WAL token and its checksummed frame

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{compute_checksum, verify_checksum};
use crate::error::{ChronoError, ChronoResult};
use crate::serialization::base64_bytes;
use crate::temporal::{QualifiedKey, Timestamp};

/// What recovery does with a token found at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalTokenKind {
    /// Final commit: roll forward
    Commit,
    /// Open incremental sequence: discard
    Incremental,
}

/// One staged change; `value == None` is a removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    pub keyspace: String,
    pub key: String,
    #[serde(with = "base64_bytes", default)]
    pub value: Option<Vec<u8>>,
}

impl WalEntry {
    pub fn qualified_key(&self) -> QualifiedKey {
        QualifiedKey::new(self.keyspace.clone(), self.key.clone())
    }
}

/// Durable record of an in-flight commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalToken {
    pub branch: String,
    pub timestamp: Timestamp,
    pub kind: WalTokenKind,
    pub entries: Vec<WalEntry>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl WalToken {
    pub fn commit(
        branch: impl Into<String>,
        timestamp: Timestamp,
        entries: Vec<WalEntry>,
        metadata: Option<Value>,
    ) -> Self {
        Self {
            branch: branch.into(),
            timestamp,
            kind: WalTokenKind::Commit,
            entries,
            metadata,
        }
    }

    /// Marker for an open incremental sequence; the staged changes live in
    /// the matrices under intermediate timestamps, not in the token.
    pub fn incremental(branch: impl Into<String>, first_timestamp: Timestamp) -> Self {
        Self {
            branch: branch.into(),
            timestamp: first_timestamp,
            kind: WalTokenKind::Incremental,
            entries: Vec::new(),
            metadata: None,
        }
    }

    /// Serializes into `len | json | crc`
    pub fn encode(&self) -> ChronoResult<Vec<u8>> {
        let payload = serde_json::to_vec(self)?;
        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&compute_checksum(&payload).to_le_bytes());
        Ok(frame)
    }

    pub fn decode(frame: &[u8]) -> ChronoResult<Self> {
        if frame.len() < 8 {
            return Err(ChronoError::Corruption(format!(
                "WAL token frame too short: {} bytes",
                frame.len()
            )));
        }
        let length = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        if frame.len() != length + 8 {
            return Err(ChronoError::Corruption(format!(
                "WAL token length mismatch: header says {}, frame holds {}",
                length,
                frame.len() - 8
            )));
        }
        let payload = &frame[4..4 + length];
        let stored = u32::from_le_bytes([
            frame[4 + length],
            frame[5 + length],
            frame[6 + length],
            frame[7 + length],
        ]);
        if !verify_checksum(payload, stored) {
            return Err(ChronoError::Corruption(
                "WAL token checksum mismatch".to_string(),
            ));
        }
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token() -> WalToken {
        WalToken::commit(
            "master",
            42,
            vec![
                WalEntry {
                    keyspace: "default".into(),
                    key: "Hello".into(),
                    value: Some(b"\"World\"".to_vec()),
                },
                WalEntry {
                    keyspace: "default".into(),
                    key: "Gone".into(),
                    value: None,
                },
            ],
            Some(json!({"author": "test"})),
        )
    }

    #[test]
    fn test_frame_round_trip() {
        let original = token();
        let decoded = WalToken::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.entries[1].value, None);
    }

    #[test]
    fn test_flipped_bit_is_corruption() {
        let mut frame = token().encode().unwrap();
        frame[6] ^= 0x01;
        let err = WalToken::decode(&frame).unwrap_err();
        assert_eq!(err.code(), "CHRONO_CORRUPTION");
    }

    #[test]
    fn test_truncated_frame_is_corruption() {
        let frame = token().encode().unwrap();
        assert!(WalToken::decode(&frame[..frame.len() - 1]).is_err());
    }
}

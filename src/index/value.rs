//! Indexed scalar values

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::backend::codec::{encode_str, encode_u64, encode_u8, KeyReader};
use crate::backend::{StorageError, StorageResult};

const TAG_STRING: u8 = 1;
const TAG_LONG: u8 = 2;
const TAG_DOUBLE: u8 = 3;

/// Declared type of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexValueType {
    String,
    Long,
    Double,
}

impl fmt::Display for IndexValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValueType::String => write!(f, "string"),
            IndexValueType::Long => write!(f, "long"),
            IndexValueType::Double => write!(f, "double"),
        }
    }
}

/// A scalar produced by an indexer.
///
/// Ordering is String < Long < Double across types; doubles use a total
/// order over their bit patterns so NaN and -0.0 have a fixed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexValue {
    String(String),
    Long(i64),
    Double(f64),
}

impl IndexValue {
    pub fn value_type(&self) -> IndexValueType {
        match self {
            IndexValue::String(_) => IndexValueType::String,
            IndexValue::Long(_) => IndexValueType::Long,
            IndexValue::Double(_) => IndexValueType::Double,
        }
    }

    /// Total-ordering bits: negative floats flip all bits, positive floats
    /// flip the sign bit.
    fn ordered_bits(v: f64) -> u64 {
        let bits = v.to_bits();
        if (bits >> 63) == 1 {
            !bits
        } else {
            bits ^ (1 << 63)
        }
    }

    fn from_ordered_bits(ordered: u64) -> f64 {
        let bits = if (ordered >> 63) == 1 {
            ordered ^ (1 << 63)
        } else {
            !ordered
        };
        f64::from_bits(bits)
    }

    /// Appends an order-preserving encoding
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            IndexValue::String(s) => {
                encode_u8(buf, TAG_STRING);
                encode_str(buf, s);
            }
            IndexValue::Long(v) => {
                encode_u8(buf, TAG_LONG);
                encode_u64(buf, (*v as u64) ^ (1 << 63));
            }
            IndexValue::Double(v) => {
                encode_u8(buf, TAG_DOUBLE);
                encode_u64(buf, Self::ordered_bits(*v));
            }
        }
    }

    pub(crate) fn decode(reader: &mut KeyReader<'_>) -> StorageResult<Self> {
        match reader.read_u8()? {
            TAG_STRING => Ok(IndexValue::String(reader.read_str()?)),
            TAG_LONG => Ok(IndexValue::Long((reader.read_u64()? ^ (1 << 63)) as i64)),
            TAG_DOUBLE => Ok(IndexValue::Double(Self::from_ordered_bits(reader.read_u64()?))),
            other => Err(StorageError::data_corruption(format!(
                "unknown index value tag {}",
                other
            ))),
        }
    }

    fn sort_key(&self) -> (u8, Option<&str>, u64) {
        match self {
            IndexValue::String(s) => (TAG_STRING, Some(s.as_str()), 0),
            IndexValue::Long(v) => (TAG_LONG, None, (*v as u64) ^ (1 << 63)),
            IndexValue::Double(v) => (TAG_DOUBLE, None, Self::ordered_bits(*v)),
        }
    }
}

impl PartialEq for IndexValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexValue {}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl Hash for IndexValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sort_key().hash(state);
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::String(s) => write!(f, "{:?}", s),
            IndexValue::Long(v) => write!(f, "{}", v),
            IndexValue::Double(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for IndexValue {
    fn from(v: &str) -> Self {
        IndexValue::String(v.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(v: String) -> Self {
        IndexValue::String(v)
    }
}

impl From<i64> for IndexValue {
    fn from(v: i64) -> Self {
        IndexValue::Long(v)
    }
}

impl From<f64> for IndexValue {
    fn from(v: f64) -> Self {
        IndexValue::Double(v)
    }
}

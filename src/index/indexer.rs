//! Indexer functions

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::value::{IndexValue, IndexValueType};

/// Extracts indexed scalars from a stored value.
///
/// Called once per changed entity per commit; must be pure.
pub trait Indexer: Send + Sync + fmt::Debug {
    fn value_type(&self) -> IndexValueType;

    fn can_index(&self, value: &Value) -> bool;

    fn index_values(&self, value: &Value) -> BTreeSet<IndexValue>;
}

/// Serializable definition of a [`FieldIndexer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIndexDefinition {
    pub name: String,
    pub field: String,
    pub value_type: IndexValueType,
}

impl FieldIndexDefinition {
    pub fn build(&self) -> FieldIndexer {
        FieldIndexer::new(self.field.clone(), self.value_type)
    }
}

/// Indexes one field of a JSON document.
///
/// `field` is either a JSON pointer (`/a/b`) or a dotted path (`a.b`).
/// Arrays at the addressed position contribute one value per element.
/// Values that do not fit `value_type` are skipped.
#[derive(Debug, Clone)]
pub struct FieldIndexer {
    pointer: String,
    value_type: IndexValueType,
}

impl FieldIndexer {
    pub fn new(field: impl Into<String>, value_type: IndexValueType) -> Self {
        let field = field.into();
        let pointer = if field.starts_with('/') {
            field
        } else {
            let mut pointer = String::with_capacity(field.len() + 1);
            for segment in field.split('.') {
                pointer.push('/');
                pointer.push_str(&segment.replace('~', "~0").replace('/', "~1"));
            }
            pointer
        };
        Self {
            pointer,
            value_type,
        }
    }

    fn convert(&self, value: &Value) -> Option<IndexValue> {
        match (self.value_type, value) {
            (IndexValueType::String, Value::String(s)) => Some(IndexValue::String(s.clone())),
            (IndexValueType::Long, Value::Number(n)) => n.as_i64().map(IndexValue::Long),
            (IndexValueType::Double, Value::Number(n)) => n.as_f64().map(IndexValue::Double),
            _ => None,
        }
    }
}

impl Indexer for FieldIndexer {
    fn value_type(&self) -> IndexValueType {
        self.value_type
    }

    fn can_index(&self, value: &Value) -> bool {
        value.pointer(&self.pointer).is_some()
    }

    fn index_values(&self, value: &Value) -> BTreeSet<IndexValue> {
        match value.pointer(&self.pointer) {
            Some(Value::Array(items)) => items.iter().filter_map(|v| self.convert(v)).collect(),
            Some(v) => self.convert(v).into_iter().collect(),
            None => BTreeSet::new(),
        }
    }
}

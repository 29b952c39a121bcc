//! Secondary index engine
//!
//! Named indexes over scalar properties extracted from stored values by
//! indexer functions, queryable at any point in time.
//!
//! # Model
//!
//! An index document associates an indexed value with an entity key for
//! a validity interval `[valid_from, valid_to)`. A commit that changes an
//! entity terminates documents whose value is no longer produced and
//! creates documents for newly produced values. Documents are never
//! reopened except by rollback.
//!
//! # Invariants
//!
//! - Modifications of one commit are applied atomically with respect to
//!   readers, in the order terminations, creations, deletions
//! - Documents for the same `(index, branch, keyspace, key, value)` never
//!   overlap in validity
//! - Querying an unknown index is an error, not an empty result
//! - Querying a dirty index is an error until it is rebuilt

mod document;
mod indexer;
mod manager;
mod search;
mod store;
mod value;

pub use document::{IndexDocument, IndexModifications};
pub use indexer::{FieldIndexDefinition, FieldIndexer, Indexer};
pub use manager::IndexManager;
pub use search::{MatchMode, NumberCondition, SearchSpec, StringCondition, DEFAULT_DOUBLE_TOLERANCE};
pub use value::{IndexValue, IndexValueType};

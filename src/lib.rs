//! chronodb - an embeddable temporal key-value store
//!
//! Every write is versioned by a commit timestamp, every read can be pinned
//! to a point in time, and the key space can be forked into branches that
//! share history up to their branching timestamp.
//!
//! ```ignore
//! use chronodb::ChronoDb;
//! use serde_json::json;
//!
//! let db = ChronoDb::in_memory()?;
//! let mut tx = db.tx()?;
//! tx.put("default", "Hello", json!("World"))?;
//! let first = tx.commit(None)?;
//!
//! let old = db.tx_at("master", first)?;
//! assert_eq!(old.get("default", "Hello")?, Some(json!("World")));
//! ```

pub mod backend;
pub mod branch;
pub mod cli;
pub mod crash_point;
pub mod db;
pub mod error;
pub mod index;
pub mod matrix;
pub mod observability;
pub mod recovery;
pub mod serialization;
pub mod temporal;
pub mod tkvs;
pub mod txn;
pub mod wal;

pub use branch::{Branch, BranchManager, BranchMetadata, MASTER_BRANCH};
pub use db::{ChronoConfig, ChronoDb};
pub use error::{ChronoError, ChronoResult};
pub use temporal::{Period, QualifiedKey, TemporalKey, Timestamp, MAX_TIMESTAMP};
pub use tkvs::{ConflictResolution, DEFAULT_KEYSPACE};
pub use txn::{SharedTransaction, Transaction, TransactionConfig};

//! Transactions
//!
//! A transaction captures one timestamp at open time and reads every
//! keyspace of its branch as of that timestamp. Writes are staged in an
//! in-memory change set and handed to the branch's store on commit.
//!
//! - Commits that happen after the transaction opened are never visible
//!   to it
//! - Staged writes are not visible to its own reads; after an incremental
//!   commit the transaction reads at its latest intermediate timestamp
//! - A committed or rolled-back transaction rejects every further call
//! - Dropping a transaction with an open incremental sequence discards
//!   that sequence

mod shared;
mod transaction;

pub use shared::SharedTransaction;
pub use transaction::{Transaction, TransactionConfig};

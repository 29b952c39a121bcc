//! Write-ahead log slot
//!
//! Each TKVS owns exactly one WAL slot holding at most one token: the
//! durable record of the commit currently in flight. The token is written
//! and flushed before any matrix mutation and cleared only after the commit
//! metadata is durable and `now` has advanced.
//!
//! # Token framing
//!
//! ```text
//! +------------------+
//! | Payload Length   | (u32 LE)
//! +------------------+
//! | Payload          | (JSON-encoded WalToken)
//! +------------------+
//! | Checksum         | (u32 LE, CRC32 of payload)
//! +------------------+
//! ```
//!
//! A token that fails its checksum is never silently ignored: recovery
//! surfaces it as corruption.

mod slot;
mod token;

pub use slot::WalSlot;
pub use token::{WalEntry, WalToken, WalTokenKind};

//! Startup recovery
//!
//! Runs once when a database opens, after the branch tree is loaded and
//! before any transaction can start.
//!
//! # Startup Sequence (strict order)
//!
//! 1. Check for the clean-shutdown marker
//! 2. For every branch, parents first, inspect its WAL slot
//!    - `Commit` token: roll forward
//!    - `Incremental` token: discard
//! 3. Mark every index dirty if a token was found or the previous run did
//!    not shut down cleanly
//! 4. Remove the clean-shutdown marker
//!
//! Partial application is never a valid end state: a failure in any step
//! is fatal and the database does not open.

mod startup;

pub use startup::{RecoveryManager, RecoveryState};

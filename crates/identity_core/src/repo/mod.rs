//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the contact store contract the reconciler depends on.
//! - Isolate SQLite query details from service orchestration.
//! - Offer an in-process store variant behind the same contract.
//!
//! # Invariants
//! - Write paths validate contact invariants before persistence.
//! - Soft-deleted contacts are invisible to every read.
//! - Multi-row reads are ordered by `created_at ASC, id ASC`.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod contact_repo;
pub mod memory_repo;

/// Current wall-clock time in Unix epoch milliseconds.
pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}

//! Domain model for contact identity records.
//!
//! # Responsibility
//! - Define canonical contact records shared by repository and service layers.
//! - Define the consolidated projection returned to callers.
//!
//! # Invariants
//! - Every contact is identified by a monotonically assigned `ContactId`.
//! - Deletion is represented by a soft-delete timestamp, never a hard delete.

pub mod consolidated;
pub mod contact;

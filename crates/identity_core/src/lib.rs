//! Identity reconciliation core.
//! This crate is the single source of truth for contact linking invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::CoreConfig;
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::consolidated::{ConsolidatedContact, IdentifyResponse};
pub use model::contact::{
    Contact, ContactId, ContactUpdate, ContactValidationError, LinkPrecedence, NewContact,
};
pub use repo::contact_repo::{ContactRepository, RepoError, RepoResult, SqliteContactRepository};
pub use repo::memory_repo::MemoryContactRepository;
pub use service::identity_service::{IdentityService, StoreHealth};
pub use service::normalizer::{
    ContactNormalizer, DefaultNormalizer, IdentifyRequest, InputError, NormalizedIdentity,
    PassthroughNormalizer,
};
pub use service::reconciler::{
    build_consolidated, should_create_secondary, IdentifyError, Reconciler,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

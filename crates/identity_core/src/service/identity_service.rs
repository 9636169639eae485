//! Identity use-case service.
//!
//! # Responsibility
//! - Accept raw identify requests from outer layers.
//! - Normalize input with the injected `ContactNormalizer`, then delegate
//!   to `Reconciler`.
//!
//! # Invariants
//! - Input rejected by the normalizer never reaches the store.
//! - Service layer remains storage-agnostic.

use crate::model::consolidated::ConsolidatedContact;
use crate::model::contact::ContactId;
use crate::repo::contact_repo::{ContactRepository, RepoResult};
use crate::service::normalizer::{ContactNormalizer, DefaultNormalizer, IdentifyRequest};
use crate::service::reconciler::{IdentifyError, Reconciler};
use log::warn;

/// Store health snapshot for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHealth {
    pub contact_count: u64,
    pub core_version: &'static str,
}

/// Request-level facade over normalization and reconciliation.
pub struct IdentityService<R: ContactRepository, N: ContactNormalizer = DefaultNormalizer> {
    reconciler: Reconciler<R>,
    normalizer: N,
}

impl<R: ContactRepository> IdentityService<R, DefaultNormalizer> {
    /// Creates a service with the validating default normalizer.
    pub fn new(store: R) -> Self {
        Self::with_normalizer(store, DefaultNormalizer)
    }
}

impl<R: ContactRepository, N: ContactNormalizer> IdentityService<R, N> {
    /// Creates a service with a caller-provided normalizer.
    pub fn with_normalizer(store: R, normalizer: N) -> Self {
        Self {
            reconciler: Reconciler::new(store),
            normalizer,
        }
    }

    /// Normalizes `request` and reconciles it against the store.
    pub fn identify(
        &self,
        request: &IdentifyRequest,
    ) -> Result<ConsolidatedContact, IdentifyError> {
        let identity = self.normalizer.normalize(request).map_err(|err| {
            warn!("event=identify module=service status=rejected reason={err}");
            err
        })?;
        self.reconciler
            .identify(identity.email(), identity.phone_number())
    }

    /// Returns the consolidated view for the group containing `id`.
    pub fn consolidated_for(&self, id: ContactId) -> Result<ConsolidatedContact, IdentifyError> {
        self.reconciler.consolidated_for(id)
    }

    /// Probes the store and reports basic counters.
    pub fn health(&self) -> RepoResult<StoreHealth> {
        let store = self.reconciler.store();
        store.check_connection()?;
        Ok(StoreHealth {
            contact_count: store.count_contacts()?,
            core_version: crate::core_version(),
        })
    }

    pub fn reconciler(&self) -> &Reconciler<R> {
        &self.reconciler
    }
}

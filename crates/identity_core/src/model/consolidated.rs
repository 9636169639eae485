//! Consolidated identity projection.
//!
//! # Invariants
//! - `emails[0]` / `phone_numbers[0]` are the primary's own values when set.
//! - Lists hold no duplicates; later entries follow secondary creation order.

use super::contact::ContactId;
use serde::{Deserialize, Serialize};

/// One logical customer assembled from a primary and its secondaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedContact {
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Response envelope for identify callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ConsolidatedContact,
}

impl From<ConsolidatedContact> for IdentifyResponse {
    fn from(contact: ConsolidatedContact) -> Self {
        Self { contact }
    }
}

//! Contact domain model.
//!
//! # Responsibility
//! - Define the stored contact record and its link precedence.
//! - Provide write-side request shapes (`NewContact`, `ContactUpdate`).
//!
//! # Invariants
//! - At least one of `email` / `phone_number` is set.
//! - `linked_id` is present iff `link_precedence == Secondary`.
//! - A contact never links to itself.
//! - `created_at` is set once at creation and never mutated.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Store-assigned contact identifier. Assigned monotonically.
pub type ContactId = i64;

/// Role of a contact inside its identity group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPrecedence {
    /// Canonical record of a group. Exactly one per group.
    Primary,
    /// Record folded into a primary's group.
    Secondary,
}

impl LinkPrecedence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// Invariant violations detected on contact records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactValidationError {
    /// Neither email nor phone number is set.
    MissingContactInfo,
    /// Secondary record has no `linked_id`.
    SecondaryWithoutLink,
    /// Primary record carries a `linked_id`.
    PrimaryWithLink(ContactId),
    /// Record links to its own id.
    SelfLink(ContactId),
}

impl Display for ContactValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingContactInfo => {
                write!(f, "contact must have at least one of email or phone number")
            }
            Self::SecondaryWithoutLink => write!(f, "secondary contact must have linked_id"),
            Self::PrimaryWithLink(linked_id) => {
                write!(f, "primary contact must not link to {linked_id}")
            }
            Self::SelfLink(id) => write!(f, "contact {id} must not link to itself"),
        }
    }
}

impl Error for ContactValidationError {}

/// Stored contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    /// Lowercased email, when known.
    pub email: Option<String>,
    /// Canonical digit/prefix phone form, when known.
    pub phone_number: Option<String>,
    /// Owning primary id. Set only for secondary records.
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    /// Unix epoch milliseconds. Sole "oldest" ordering key (ties by `id`).
    pub created_at: i64,
    /// Unix epoch milliseconds, refreshed on every mutation.
    pub updated_at: i64,
    /// Soft-delete tombstone. Deleted records are invisible to matching.
    pub deleted_at: Option<i64>,
}

impl Contact {
    /// Validates record-level invariants.
    pub fn validate(&self) -> Result<(), ContactValidationError> {
        validate_fields(
            Some(self.id),
            self.email.as_deref(),
            self.phone_number.as_deref(),
            self.linked_id,
            self.link_precedence,
        )
    }

    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Returns the id of the primary owning this contact's group.
    ///
    /// `None` only for a secondary without `linked_id`, which `validate`
    /// rejects.
    pub fn group_root(&self) -> Option<ContactId> {
        match self.link_precedence {
            LinkPrecedence::Primary => Some(self.id),
            LinkPrecedence::Secondary => self.linked_id,
        }
    }
}

/// Insert request for one contact row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    /// Creates a fresh primary request.
    pub fn primary(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    /// Creates a secondary request linked to `primary_id`.
    pub fn secondary(
        email: Option<&str>,
        phone_number: Option<&str>,
        primary_id: ContactId,
    ) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            linked_id: Some(primary_id),
            link_precedence: LinkPrecedence::Secondary,
        }
    }

    pub fn validate(&self) -> Result<(), ContactValidationError> {
        validate_fields(
            None,
            self.email.as_deref(),
            self.phone_number.as_deref(),
            self.linked_id,
            self.link_precedence,
        )
    }
}

/// Partial update applied by `ContactRepository::update_contact`.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactUpdate {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: Option<LinkPrecedence>,
}

impl ContactUpdate {
    /// Update that turns a primary into a secondary of `winner_id`.
    pub fn demote_to(winner_id: ContactId) -> Self {
        Self {
            linked_id: Some(winner_id),
            link_precedence: Some(LinkPrecedence::Secondary),
            ..Self::default()
        }
    }

    /// Applies the set fields onto `contact`.
    pub fn apply_to(&self, contact: &mut Contact) {
        if let Some(email) = &self.email {
            contact.email = Some(email.clone());
        }
        if let Some(phone_number) = &self.phone_number {
            contact.phone_number = Some(phone_number.clone());
        }
        if let Some(linked_id) = self.linked_id {
            contact.linked_id = Some(linked_id);
        }
        if let Some(precedence) = self.link_precedence {
            contact.link_precedence = precedence;
        }
    }
}

fn validate_fields(
    id: Option<ContactId>,
    email: Option<&str>,
    phone_number: Option<&str>,
    linked_id: Option<ContactId>,
    precedence: LinkPrecedence,
) -> Result<(), ContactValidationError> {
    if email.is_none() && phone_number.is_none() {
        return Err(ContactValidationError::MissingContactInfo);
    }

    match (precedence, linked_id) {
        (LinkPrecedence::Secondary, None) => {
            return Err(ContactValidationError::SecondaryWithoutLink)
        }
        (LinkPrecedence::Primary, Some(linked_id)) => {
            return Err(ContactValidationError::PrimaryWithLink(linked_id))
        }
        _ => {}
    }

    if let (Some(id), Some(linked_id)) = (id, linked_id) {
        if id == linked_id {
            return Err(ContactValidationError::SelfLink(id));
        }
    }

    Ok(())
}

//! Identity reconciliation use-case.
//!
//! # Responsibility
//! - Decide whether an `(email, phone)` pair matches existing contacts.
//! - Merge groups that the pair proves to be one identity.
//! - Build the consolidated view of the resulting group.
//!
//! # Invariants
//! - Exactly one primary per group; secondaries link straight to it.
//! - The oldest primary (`created_at`, then `id`) wins every merge.
//! - One identify call is one store unit of work (`ContactRepository::atomic`).
//! - Emails and phone numbers are never logged.

use crate::model::consolidated::ConsolidatedContact;
use crate::model::contact::{Contact, ContactId, ContactUpdate, NewContact};
use crate::repo::contact_repo::{ContactRepository, RepoError};
use crate::service::normalizer::InputError;
use log::{debug, error, info};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Errors from identify and group lookups.
#[derive(Debug)]
pub enum IdentifyError {
    /// Caller input rejected before any store access.
    InvalidInput(InputError),
    /// A resolved group root is missing or is not a primary.
    MissingPrimary { group_root: ContactId },
    /// A group holds zero or several primaries.
    InconsistentGroup(String),
    /// Store read/write failure.
    Repo(RepoError),
}

impl IdentifyError {
    /// Whether the caller may retry the whole identify call.
    ///
    /// Only transport-level store failures qualify; invariant violations
    /// indicate corrupted data and will fail again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Repo(RepoError::Db(_)))
    }
}

impl Display for IdentifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(err) => write!(f, "invalid input: {err}"),
            Self::MissingPrimary { group_root } => {
                write!(f, "primary contact not found for group {group_root}")
            }
            Self::InconsistentGroup(details) => write!(f, "inconsistent contact group: {details}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IdentifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidInput(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for IdentifyError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<InputError> for IdentifyError {
    fn from(value: InputError) -> Self {
        Self::InvalidInput(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    CreatePrimary,
    SingleGroup,
    Merge,
}

impl Branch {
    fn as_str(self) -> &'static str {
        match self {
            Self::CreatePrimary => "create_primary",
            Self::SingleGroup => "single_group",
            Self::Merge => "merge",
        }
    }
}

struct Reconciled {
    branch: Branch,
    created: usize,
    demoted: usize,
    view: ConsolidatedContact,
}

/// Primary plus its directly linked secondaries, oldest first.
struct ContactGroup {
    primary: Contact,
    secondaries: Vec<Contact>,
}

impl ContactGroup {
    fn into_members(self) -> Vec<Contact> {
        let mut members = Vec::with_capacity(self.secondaries.len() + 1);
        members.push(self.primary);
        members.extend(self.secondaries);
        members
    }
}

/// Links contact records sharing an email or phone into one identity.
pub struct Reconciler<R: ContactRepository> {
    store: R,
}

impl<R: ContactRepository> Reconciler<R> {
    /// Creates a reconciler over the provided contact store.
    pub fn new(store: R) -> Self {
        Self { store }
    }

    /// Borrows the underlying store.
    pub fn store(&self) -> &R {
        &self.store
    }

    /// Releases the underlying store.
    pub fn into_store(self) -> R {
        self.store
    }

    /// Reconciles one already-normalized `(email, phone)` pair.
    ///
    /// # Contract
    /// - At least one argument must be `Some`; otherwise `InvalidInput`
    ///   without touching the store.
    /// - Creates at most one contact and may demote/re-point whole groups.
    /// - All mutations commit together or not at all.
    pub fn identify(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<ConsolidatedContact, IdentifyError> {
        if email.is_none() && phone_number.is_none() {
            return Err(IdentifyError::InvalidInput(InputError::MissingContactInfo));
        }

        let started_at = Instant::now();
        let outcome = self
            .store
            .atomic(|store| reconcile(store, email, phone_number));

        match outcome {
            Ok(reconciled) => {
                info!(
                    "event=identify module=reconciler status=ok branch={} primary_id={} secondary_count={} created={} demoted={} duration_ms={}",
                    reconciled.branch.as_str(),
                    reconciled.view.primary_contact_id,
                    reconciled.view.secondary_contact_ids.len(),
                    reconciled.created,
                    reconciled.demoted,
                    started_at.elapsed().as_millis()
                );
                Ok(reconciled.view)
            }
            Err(err) => {
                error!(
                    "event=identify module=reconciler status=error retryable={} duration_ms={} error={}",
                    err.is_retryable(),
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Returns the consolidated view of the group `id` belongs to.
    ///
    /// Read-only. Unknown or soft-deleted ids yield `RepoError::NotFound`.
    pub fn consolidated_for(&self, id: ContactId) -> Result<ConsolidatedContact, IdentifyError> {
        let contact = self
            .store
            .find_by_id(id)?
            .ok_or(RepoError::NotFound(id))?;
        let group_root = contact
            .group_root()
            .ok_or(IdentifyError::MissingPrimary { group_root: id })?;
        let group = fetch_group(&self.store, group_root)?;
        build_consolidated(&group.into_members())
    }
}

fn reconcile<R: ContactRepository>(
    store: &R,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> Result<Reconciled, IdentifyError> {
    let matches = store.find_by_email_or_phone(email, phone_number)?;
    if matches.is_empty() {
        let created = store.create_contact(&NewContact::primary(email, phone_number))?;
        return Ok(Reconciled {
            branch: Branch::CreatePrimary,
            created: 1,
            demoted: 0,
            view: build_consolidated(&[created])?,
        });
    }

    let mut groups = resolve_groups(store, &matches)?;
    if groups.len() == 1 {
        let group = groups.remove(0);
        let primary_id = group.primary.id;
        let mut members = group.into_members();
        let created = append_if_new(store, &mut members, primary_id, email, phone_number)?;
        return Ok(Reconciled {
            branch: Branch::SingleGroup,
            created,
            demoted: 0,
            view: build_consolidated(&members)?,
        });
    }

    let winner_id = groups
        .iter()
        .map(|group| &group.primary)
        .min_by_key(|primary| (primary.created_at, primary.id))
        .map(|primary| primary.id)
        .ok_or_else(|| IdentifyError::InconsistentGroup("merge found no primaries".to_string()))?;

    let mut demoted = 0;
    for group in groups.iter().filter(|group| group.primary.id != winner_id) {
        let loser_id = group.primary.id;
        store.update_contact(loser_id, &ContactUpdate::demote_to(winner_id))?;
        let repointed = store.update_all_by_linked_id(loser_id, winner_id)?;
        demoted += 1;
        debug!(
            "event=merge_group module=reconciler status=ok winner_id={winner_id} loser_id={loser_id} repointed={repointed}"
        );
    }

    let mut members = fetch_group(store, winner_id)?.into_members();
    let created = append_if_new(store, &mut members, winner_id, email, phone_number)?;
    Ok(Reconciled {
        branch: Branch::Merge,
        created,
        demoted,
        view: build_consolidated(&members)?,
    })
}

/// Fetches every distinct group touched by `matches`, in first-match order.
fn resolve_groups<R: ContactRepository>(
    store: &R,
    matches: &[Contact],
) -> Result<Vec<ContactGroup>, IdentifyError> {
    let mut seen = HashSet::new();
    let mut groups = Vec::new();
    for contact in matches {
        let group_root = contact
            .group_root()
            .ok_or(IdentifyError::MissingPrimary {
                group_root: contact.id,
            })?;
        if seen.insert(group_root) {
            groups.push(fetch_group(store, group_root)?);
        }
    }
    Ok(groups)
}

fn fetch_group<R: ContactRepository>(
    store: &R,
    group_root: ContactId,
) -> Result<ContactGroup, IdentifyError> {
    let primary = store
        .find_by_id(group_root)?
        .filter(Contact::is_primary)
        .ok_or(IdentifyError::MissingPrimary { group_root })?;

    let mut seen = HashSet::from([primary.id]);
    let secondaries = store
        .find_by_linked_id(group_root)?
        .into_iter()
        .filter(|contact| seen.insert(contact.id))
        .collect();

    Ok(ContactGroup {
        primary,
        secondaries,
    })
}

fn append_if_new<R: ContactRepository>(
    store: &R,
    members: &mut Vec<Contact>,
    primary_id: ContactId,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> Result<usize, IdentifyError> {
    if !should_create_secondary(members, email, phone_number) {
        return Ok(0);
    }
    let created = store.create_contact(&NewContact::secondary(email, phone_number, primary_id))?;
    members.push(created);
    Ok(1)
}

/// Returns whether `(email, phone_number)` adds information to `group`.
///
/// False when some member already holds the exact pair (absent fields
/// compared as absent). Otherwise true when a present email or phone is
/// missing from every member.
pub fn should_create_secondary(
    group: &[Contact],
    email: Option<&str>,
    phone_number: Option<&str>,
) -> bool {
    let exact_match = group.iter().any(|contact| {
        contact.email.as_deref() == email && contact.phone_number.as_deref() == phone_number
    });
    if exact_match {
        return false;
    }

    let new_email = email.is_some_and(|email| {
        group
            .iter()
            .all(|contact| contact.email.as_deref() != Some(email))
    });
    let new_phone = phone_number.is_some_and(|phone_number| {
        group
            .iter()
            .all(|contact| contact.phone_number.as_deref() != Some(phone_number))
    });

    new_email || new_phone
}

/// Builds the consolidated view of one group.
///
/// # Contract
/// - `group` must contain exactly one primary.
/// - Primary values come first; secondary values follow in
///   `(created_at, id)` order, first occurrence wins.
pub fn build_consolidated(group: &[Contact]) -> Result<ConsolidatedContact, IdentifyError> {
    let mut primaries = group.iter().filter(|contact| contact.is_primary());
    let primary = primaries.next().ok_or_else(|| {
        IdentifyError::InconsistentGroup("group has no primary contact".to_string())
    })?;
    if let Some(other) = primaries.next() {
        return Err(IdentifyError::InconsistentGroup(format!(
            "group has multiple primaries: {} and {}",
            primary.id, other.id
        )));
    }

    let mut secondaries: Vec<&Contact> = group
        .iter()
        .filter(|contact| !contact.is_primary())
        .collect();
    secondaries.sort_by_key(|contact| (contact.created_at, contact.id));
    secondaries.dedup_by_key(|contact| contact.id);

    Ok(ConsolidatedContact {
        primary_contact_id: primary.id,
        emails: distinct_values(
            primary.email.as_deref(),
            secondaries.iter().map(|contact| contact.email.as_deref()),
        ),
        phone_numbers: distinct_values(
            primary.phone_number.as_deref(),
            secondaries
                .iter()
                .map(|contact| contact.phone_number.as_deref()),
        ),
        secondary_contact_ids: secondaries.iter().map(|contact| contact.id).collect(),
    })
}

fn distinct_values<'a>(
    first: Option<&'a str>,
    rest: impl Iterator<Item = Option<&'a str>>,
) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for value in first.into_iter().chain(rest.flatten()) {
        if !values.iter().any(|seen| seen == value) {
            values.push(value.to_string());
        }
    }
    values
}

//! In-process contact store.
//!
//! # Responsibility
//! - Mirror the SQLite store semantics without a database, for tests, demos
//!   and seeding.
//!
//! # Invariants
//! - Ids are assigned monotonically starting after the highest seeded id.
//! - `atomic` restores the pre-call snapshot when `work` fails.
//! - Single-threaded: interior state lives in a `RefCell`.

use super::contact_repo::{ContactRepository, RepoError, RepoResult};
use super::now_epoch_ms;
use crate::model::contact::{Contact, ContactId, ContactUpdate, NewContact};
use std::cell::RefCell;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    contacts: BTreeMap<ContactId, Contact>,
    next_id: ContactId,
}

/// Contact store backed by an in-memory ordered map.
#[derive(Debug, Default)]
pub struct MemoryContactRepository {
    state: RefCell<MemoryState>,
}

impl MemoryContactRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated with `contacts`.
    ///
    /// Every seeded record must pass `Contact::validate`.
    pub fn with_contacts(contacts: Vec<Contact>) -> RepoResult<Self> {
        let mut state = MemoryState::default();
        for contact in contacts {
            contact.validate()?;
            state.next_id = state.next_id.max(contact.id);
            state.contacts.insert(contact.id, contact);
        }
        Ok(Self {
            state: RefCell::new(state),
        })
    }

    /// Returns every stored contact, tombstones included, ordered by id.
    pub fn snapshot(&self) -> Vec<Contact> {
        self.state.borrow().contacts.values().cloned().collect()
    }

    fn collect_sorted(&self, predicate: impl Fn(&Contact) -> bool) -> Vec<Contact> {
        let state = self.state.borrow();
        let mut contacts: Vec<Contact> = state
            .contacts
            .values()
            .filter(|contact| contact.is_active() && predicate(contact))
            .cloned()
            .collect();
        contacts.sort_by_key(|contact| (contact.created_at, contact.id));
        contacts
    }
}

impl ContactRepository for MemoryContactRepository {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        if email.is_none() && phone_number.is_none() {
            return Ok(Vec::new());
        }
        Ok(self.collect_sorted(|contact| {
            let email_match = email.is_some() && contact.email.as_deref() == email;
            let phone_match =
                phone_number.is_some() && contact.phone_number.as_deref() == phone_number;
            email_match || phone_match
        }))
    }

    fn find_by_id(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        Ok(self
            .state
            .borrow()
            .contacts
            .get(&id)
            .filter(|contact| contact.is_active())
            .cloned())
    }

    fn find_by_linked_id(&self, linked_id: ContactId) -> RepoResult<Vec<Contact>> {
        Ok(self.collect_sorted(|contact| contact.linked_id == Some(linked_id)))
    }

    fn create_contact(&self, contact: &NewContact) -> RepoResult<Contact> {
        contact.validate()?;

        let mut state = self.state.borrow_mut();
        if let Some(linked_id) = contact.linked_id {
            if !state.contacts.contains_key(&linked_id) {
                return Err(RepoError::NotFound(linked_id));
            }
        }

        state.next_id += 1;
        let now = now_epoch_ms();
        let stored = Contact {
            id: state.next_id,
            email: contact.email.clone(),
            phone_number: contact.phone_number.clone(),
            linked_id: contact.linked_id,
            link_precedence: contact.link_precedence,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.contacts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn update_contact(&self, id: ContactId, update: &ContactUpdate) -> RepoResult<Contact> {
        let mut state = self.state.borrow_mut();
        let current = state
            .contacts
            .get(&id)
            .filter(|contact| contact.is_active())
            .ok_or(RepoError::NotFound(id))?;

        let mut updated = current.clone();
        update.apply_to(&mut updated);
        updated.validate()?;
        updated.updated_at = now_epoch_ms();
        state.contacts.insert(id, updated.clone());
        Ok(updated)
    }

    fn update_all_by_linked_id(
        &self,
        old_linked_id: ContactId,
        new_linked_id: ContactId,
    ) -> RepoResult<usize> {
        let now = now_epoch_ms();
        let mut state = self.state.borrow_mut();
        let mut changed = 0;
        for contact in state.contacts.values_mut() {
            if contact.linked_id == Some(old_linked_id) {
                contact.linked_id = Some(new_linked_id);
                contact.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn count_contacts(&self) -> RepoResult<u64> {
        let active = self
            .state
            .borrow()
            .contacts
            .values()
            .filter(|contact| contact.is_active())
            .count();
        Ok(active as u64)
    }

    fn check_connection(&self) -> RepoResult<()> {
        Ok(())
    }

    fn atomic<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>,
    {
        let before = self.state.borrow().clone();
        let outcome = work(self);
        if outcome.is_err() {
            *self.state.borrow_mut() = before;
        }
        outcome
    }
}

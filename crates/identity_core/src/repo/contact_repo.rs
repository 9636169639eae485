//! Contact store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide the create/find/update operations identify runs against.
//! - Provide one atomic unit of work per identify call.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Write paths call `validate()` before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.
//! - `atomic` on SQLite opens an `IMMEDIATE` transaction, so concurrent
//!   identify calls against the same database file are serialized.

use super::now_epoch_ms;
use crate::db::DbError;
use crate::model::contact::{
    Contact, ContactId, ContactUpdate, ContactValidationError, LinkPrecedence, NewContact,
};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::error::Error;
use std::fmt::{Display, Formatter};

const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    email,
    phone_number,
    linked_id,
    link_precedence,
    created_at,
    updated_at,
    deleted_at
FROM contacts";

const CONTACT_COLUMNS: &[&str] = &[
    "id",
    "email",
    "phone_number",
    "linked_id",
    "link_precedence",
    "created_at",
    "updated_at",
    "deleted_at",
];

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for contact persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ContactValidationError),
    Db(DbError),
    NotFound(ContactId),
    InvalidData(String),
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "contact not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted contact data: {message}"),
            Self::MissingRequiredTable(table) => {
                write!(f, "contact store is missing required table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "contact store table `{table}` is missing required column `{column}`"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ContactValidationError> for RepoError {
    fn from(value: ContactValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Contact store collaborator consumed by the reconciler.
pub trait ContactRepository {
    /// Returns non-deleted contacts whose email OR phone matches.
    ///
    /// A `None` argument drops its clause; both `None` yields no rows.
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>>;
    /// Gets one non-deleted contact by id.
    fn find_by_id(&self, id: ContactId) -> RepoResult<Option<Contact>>;
    /// Returns non-deleted contacts linked to `linked_id`, oldest first.
    fn find_by_linked_id(&self, linked_id: ContactId) -> RepoResult<Vec<Contact>>;
    /// Inserts one contact and returns the stored row.
    fn create_contact(&self, contact: &NewContact) -> RepoResult<Contact>;
    /// Applies a partial update and returns the stored row.
    fn update_contact(&self, id: ContactId, update: &ContactUpdate) -> RepoResult<Contact>;
    /// Re-points every contact linked to `old_linked_id`. Returns row count.
    fn update_all_by_linked_id(
        &self,
        old_linked_id: ContactId,
        new_linked_id: ContactId,
    ) -> RepoResult<usize>;
    /// Number of non-deleted contacts.
    fn count_contacts(&self) -> RepoResult<u64>;
    /// Cheap round trip proving the store is reachable.
    fn check_connection(&self) -> RepoResult<()>;
    /// Runs `work` as one unit of work: all writes commit or none do.
    fn atomic<T, E, F>(&self, work: F) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>;
}

/// SQLite-backed contact repository.
pub struct SqliteContactRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContactRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    ///
    /// Fails when the `contacts` table or one of its columns is missing.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_contact_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn find_by_id_including_deleted(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CONTACT_SELECT_SQL} WHERE id = ?1;"))?;
        let contact = stmt.query_row([id], |row| Ok(parse_contact_row(row))).optional()?;
        contact.transpose()
    }

    fn query_contacts(&self, sql: &str, bind_values: Vec<Value>) -> RepoResult<Vec<Contact>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut contacts = Vec::new();
        while let Some(row) = rows.next()? {
            contacts.push(parse_contact_row(row)?);
        }
        Ok(contacts)
    }
}

impl ContactRepository for SqliteContactRepository<'_> {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        let mut clauses = Vec::new();
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(email) = email {
            clauses.push("email = ?");
            bind_values.push(Value::Text(email.to_string()));
        }
        if let Some(phone_number) = phone_number {
            clauses.push("phone_number = ?");
            bind_values.push(Value::Text(phone_number.to_string()));
        }
        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "{CONTACT_SELECT_SQL}
             WHERE deleted_at IS NULL
               AND ({})
             ORDER BY created_at ASC, id ASC;",
            clauses.join(" OR ")
        );
        self.query_contacts(&sql, bind_values)
    }

    fn find_by_id(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        Ok(self
            .find_by_id_including_deleted(id)?
            .filter(Contact::is_active))
    }

    fn find_by_linked_id(&self, linked_id: ContactId) -> RepoResult<Vec<Contact>> {
        self.query_contacts(
            &format!(
                "{CONTACT_SELECT_SQL}
                 WHERE linked_id = ?
                   AND deleted_at IS NULL
                 ORDER BY created_at ASC, id ASC;"
            ),
            vec![Value::Integer(linked_id)],
        )
    }

    fn create_contact(&self, contact: &NewContact) -> RepoResult<Contact> {
        contact.validate()?;

        let now = now_epoch_ms();
        self.conn.execute(
            "INSERT INTO contacts (
                email,
                phone_number,
                linked_id,
                link_precedence,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?5);",
            params![
                contact.email.as_deref(),
                contact.phone_number.as_deref(),
                contact.linked_id,
                contact.link_precedence.as_str(),
                now,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        self.find_by_id_including_deleted(id)?.ok_or_else(|| {
            RepoError::InvalidData(format!("inserted contact {id} could not be read back"))
        })
    }

    fn update_contact(&self, id: ContactId, update: &ContactUpdate) -> RepoResult<Contact> {
        let mut contact = self.find_by_id(id)?.ok_or(RepoError::NotFound(id))?;
        update.apply_to(&mut contact);
        contact.validate()?;
        contact.updated_at = now_epoch_ms();

        let changed = self.conn.execute(
            "UPDATE contacts
             SET
                email = ?1,
                phone_number = ?2,
                linked_id = ?3,
                link_precedence = ?4,
                updated_at = ?5
             WHERE id = ?6
               AND deleted_at IS NULL;",
            params![
                contact.email.as_deref(),
                contact.phone_number.as_deref(),
                contact.linked_id,
                contact.link_precedence.as_str(),
                contact.updated_at,
                id,
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(contact)
    }

    fn update_all_by_linked_id(
        &self,
        old_linked_id: ContactId,
        new_linked_id: ContactId,
    ) -> RepoResult<usize> {
        // Tombstoned rows are re-pointed too so no link ever targets a demoted primary.
        let changed = self.conn.execute(
            "UPDATE contacts
             SET
                linked_id = ?1,
                updated_at = ?2
             WHERE linked_id = ?3;",
            params![new_linked_id, now_epoch_ms(), old_linked_id],
        )?;
        Ok(changed)
    }

    fn count_contacts(&self) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM contacts WHERE deleted_at IS NULL;",
            [],
            |row| row.get(0),
        )?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative contact count `{count}`")))
    }

    fn check_connection(&self) -> RepoResult<()> {
        self.conn.query_row("SELECT 1;", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn atomic<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>,
    {
        // Dropping `tx` without commit rolls back.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(RepoError::from)?;
        let value = work(self)?;
        tx.commit().map_err(RepoError::from)?;
        Ok(value)
    }
}

fn parse_contact_row(row: &Row<'_>) -> RepoResult<Contact> {
    let precedence_text: String = row.get("link_precedence")?;
    let link_precedence = LinkPrecedence::parse(&precedence_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid link precedence `{precedence_text}` in contacts.link_precedence"
        ))
    })?;

    let contact = Contact {
        id: row.get("id")?,
        email: row.get("email")?,
        phone_number: row.get("phone_number")?,
        linked_id: row.get("linked_id")?,
        link_precedence,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    };
    contact.validate()?;
    Ok(contact)
}

fn ensure_contact_connection_ready(conn: &Connection) -> RepoResult<()> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = 'contacts'
        );",
        [],
        |row| row.get(0),
    )?;
    if exists != 1 {
        return Err(RepoError::MissingRequiredTable("contacts"));
    }

    let mut stmt = conn.prepare("PRAGMA table_info(contacts);")?;
    let mut rows = stmt.query([])?;
    let mut present = Vec::new();
    while let Some(row) = rows.next()? {
        present.push(row.get::<_, String>(1)?);
    }

    for &column in CONTACT_COLUMNS {
        if !present.iter().any(|name| name == column) {
            return Err(RepoError::MissingRequiredColumn {
                table: "contacts",
                column,
            });
        }
    }

    Ok(())
}

use identity_core::db::open_db_in_memory;
use identity_core::{
    Contact, ContactRepository, IdentifyError, InputError, LinkPrecedence,
    MemoryContactRepository, Reconciler, RepoError, SqliteContactRepository,
};
use rusqlite::{params, Connection};

const E1: &str = "lorraine@hillvalley.edu";
const E2: &str = "mcfly@hillvalley.edu";
const E3: &str = "biff@hillvalley.edu";
const P1: &str = "123456";
const P2: &str = "717171";
const P3: &str = "919191";

fn sqlite_reconciler(conn: &Connection) -> Reconciler<SqliteContactRepository<'_>> {
    Reconciler::new(SqliteContactRepository::try_new(conn).unwrap())
}

fn memory_reconciler() -> Reconciler<MemoryContactRepository> {
    Reconciler::new(MemoryContactRepository::new())
}

fn stored<R: ContactRepository>(reconciler: &Reconciler<R>, id: i64) -> Contact {
    reconciler.store().find_by_id(id).unwrap().unwrap()
}

/// Every secondary links straight to a primary.
fn assert_no_multi_level_links<R: ContactRepository>(reconciler: &Reconciler<R>) {
    let count = reconciler.store().count_contacts().unwrap() as i64;
    for id in 1..=count {
        let contact = stored(reconciler, id);
        if let Some(linked_id) = contact.linked_id {
            assert_eq!(contact.link_precedence, LinkPrecedence::Secondary);
            let target = stored(reconciler, linked_id);
            assert_eq!(
                target.link_precedence,
                LinkPrecedence::Primary,
                "contact {id} links to non-primary {linked_id}"
            );
        }
    }
}

fn check_fresh_identity<R: ContactRepository>(reconciler: &Reconciler<R>) {
    let view = reconciler.identify(Some("a@x.com"), None).unwrap();

    assert_eq!(view.emails, vec!["a@x.com"]);
    assert!(view.phone_numbers.is_empty());
    assert!(view.secondary_contact_ids.is_empty());
    assert_eq!(reconciler.store().count_contacts().unwrap(), 1);

    let primary = stored(reconciler, view.primary_contact_id);
    assert!(primary.is_primary());
    assert_eq!(primary.phone_number, None);
    assert_eq!(primary.linked_id, None);
}

fn check_idempotent_exact_match<R: ContactRepository>(reconciler: &Reconciler<R>) {
    let first = reconciler.identify(Some(E1), Some(P1)).unwrap();
    let second = reconciler.identify(Some(E1), Some(P1)).unwrap();
    let partial = reconciler.identify(Some(E1), None).unwrap();

    assert_eq!(first, second);
    assert_eq!(first, partial);
    assert_eq!(reconciler.store().count_contacts().unwrap(), 1);
}

fn check_new_info_same_group<R: ContactRepository>(reconciler: &Reconciler<R>) {
    let primary = reconciler.identify(Some(E1), Some(P1)).unwrap();
    let view = reconciler.identify(Some(E1), Some(P2)).unwrap();

    assert_eq!(view.primary_contact_id, primary.primary_contact_id);
    assert_eq!(view.emails, vec![E1]);
    assert_eq!(view.phone_numbers, vec![P1, P2]);
    assert_eq!(view.secondary_contact_ids.len(), 1);
    assert_eq!(reconciler.store().count_contacts().unwrap(), 2);

    let secondary = stored(reconciler, view.secondary_contact_ids[0]);
    assert_eq!(secondary.link_precedence, LinkPrecedence::Secondary);
    assert_eq!(secondary.linked_id, Some(primary.primary_contact_id));
    assert_eq!(secondary.email.as_deref(), Some(E1));
    assert_eq!(secondary.phone_number.as_deref(), Some(P2));
}

fn check_merge_picks_oldest<R: ContactRepository>(reconciler: &Reconciler<R>) {
    let a = reconciler.identify(Some(E1), Some(P1)).unwrap();
    let b = reconciler.identify(Some(E2), Some(P2)).unwrap();
    let b_secondary = reconciler.identify(Some(E3), Some(P2)).unwrap();
    assert_eq!(b_secondary.primary_contact_id, b.primary_contact_id);
    let b_secondary_id = b_secondary.secondary_contact_ids[0];

    let merged = reconciler.identify(Some(E1), Some(P2)).unwrap();

    assert_eq!(merged.primary_contact_id, a.primary_contact_id);
    assert_eq!(merged.emails, vec![E1, E2, E3]);
    assert_eq!(merged.phone_numbers, vec![P1, P2]);
    assert_eq!(
        merged.secondary_contact_ids,
        vec![b.primary_contact_id, b_secondary_id]
    );
    // E1 and P2 were both already known after the merge.
    assert_eq!(reconciler.store().count_contacts().unwrap(), 3);

    let demoted = stored(reconciler, b.primary_contact_id);
    assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
    assert_eq!(demoted.linked_id, Some(a.primary_contact_id));
    assert!(demoted.updated_at >= demoted.created_at);
    assert_eq!(
        stored(reconciler, b_secondary_id).linked_id,
        Some(a.primary_contact_id)
    );
    assert_no_multi_level_links(reconciler);

    let again = reconciler.identify(Some(E2), Some(P1)).unwrap();
    assert_eq!(again, merged);
}

fn check_merge_of_split_halves_adds_nothing<R: ContactRepository>(reconciler: &Reconciler<R>) {
    let a = reconciler.identify(Some("a@x.com"), None).unwrap();
    let b = reconciler.identify(None, Some(P1)).unwrap();

    let merged = reconciler.identify(Some("a@x.com"), Some(P1)).unwrap();

    // Each half of the pair is already known to one side of the merge.
    assert_eq!(merged.primary_contact_id, a.primary_contact_id);
    assert_eq!(merged.emails, vec!["a@x.com"]);
    assert_eq!(merged.phone_numbers, vec![P1]);
    assert_eq!(merged.secondary_contact_ids.len(), 1);
    assert_eq!(merged.secondary_contact_ids[0], b.primary_contact_id);
    assert_eq!(reconciler.store().count_contacts().unwrap(), 2);
}

fn check_transitive_merges_stay_flat<R: ContactRepository>(reconciler: &Reconciler<R>) {
    let a = reconciler.identify(Some(E1), Some(P1)).unwrap();
    let b = reconciler.identify(Some(E2), Some(P2)).unwrap();
    let c = reconciler.identify(Some(E3), Some(P3)).unwrap();

    let bc = reconciler.identify(Some(E2), Some(P3)).unwrap();
    assert_eq!(bc.primary_contact_id, b.primary_contact_id);
    assert_eq!(bc.secondary_contact_ids, vec![c.primary_contact_id]);

    let abc = reconciler.identify(Some(E1), Some(P3)).unwrap();
    assert_eq!(abc.primary_contact_id, a.primary_contact_id);
    assert_eq!(abc.emails, vec![E1, E2, E3]);
    assert_eq!(abc.phone_numbers, vec![P1, P2, P3]);
    assert_eq!(
        abc.secondary_contact_ids,
        vec![b.primary_contact_id, c.primary_contact_id]
    );
    assert_no_multi_level_links(reconciler);
}

fn check_phone_first_identity<R: ContactRepository>(reconciler: &Reconciler<R>) {
    let primary = reconciler.identify(None, Some(P1)).unwrap();
    let view = reconciler.identify(Some(E1), Some(P1)).unwrap();

    assert_eq!(view.primary_contact_id, primary.primary_contact_id);
    assert_eq!(view.emails, vec![E1]);
    assert_eq!(view.phone_numbers, vec![P1]);
    assert_eq!(view.secondary_contact_ids.len(), 1);
}

fn check_missing_input_touches_nothing<R: ContactRepository>(reconciler: &Reconciler<R>) {
    let err = reconciler.identify(None, None).unwrap_err();
    assert!(matches!(
        err,
        IdentifyError::InvalidInput(InputError::MissingContactInfo)
    ));
    assert!(!err.is_retryable());
    assert_eq!(reconciler.store().count_contacts().unwrap(), 0);
}

fn check_consolidated_for_any_member<R: ContactRepository>(reconciler: &Reconciler<R>) {
    reconciler.identify(Some(E1), Some(P1)).unwrap();
    let view = reconciler.identify(Some(E2), Some(P1)).unwrap();

    let from_secondary = reconciler
        .consolidated_for(view.secondary_contact_ids[0])
        .unwrap();
    let from_primary = reconciler.consolidated_for(view.primary_contact_id).unwrap();
    assert_eq!(from_secondary, view);
    assert_eq!(from_primary, view);

    let err = reconciler.consolidated_for(9_999).unwrap_err();
    assert!(matches!(err, IdentifyError::Repo(RepoError::NotFound(9_999))));
}

macro_rules! on_both_stores {
    ($($check:ident),+ $(,)?) => {
        mod sqlite_store {
            $(
                #[test]
                fn $check() {
                    let conn = identity_core::db::open_db_in_memory().unwrap();
                    super::$check(&super::sqlite_reconciler(&conn));
                }
            )+
        }

        mod memory_store {
            $(
                #[test]
                fn $check() {
                    super::$check(&super::memory_reconciler());
                }
            )+
        }
    };
}

on_both_stores!(
    check_fresh_identity,
    check_idempotent_exact_match,
    check_new_info_same_group,
    check_merge_picks_oldest,
    check_merge_of_split_halves_adds_nothing,
    check_transitive_merges_stay_flat,
    check_phone_first_identity,
    check_missing_input_touches_nothing,
    check_consolidated_for_any_member,
);

#[test]
fn sqlite_merge_winner_is_decided_by_created_at_not_id() {
    let conn = open_db_in_memory().unwrap();
    let reconciler = sqlite_reconciler(&conn);

    let a = reconciler.identify(Some(E1), Some(P1)).unwrap();
    let b = reconciler.identify(Some(E2), Some(P2)).unwrap();
    set_created_at(&conn, a.primary_contact_id, 2_000);
    set_created_at(&conn, b.primary_contact_id, 1_000);

    let merged = reconciler.identify(Some(E1), Some(P2)).unwrap();
    assert_eq!(merged.primary_contact_id, b.primary_contact_id);
    assert_eq!(merged.emails, vec![E2, E1]);
    assert_eq!(merged.phone_numbers, vec![P2, P1]);
    assert_eq!(merged.secondary_contact_ids, vec![a.primary_contact_id]);
}

#[test]
fn memory_merge_breaks_created_at_ties_by_lowest_id() {
    let seeded = vec![
        primary_at(7, E1, P1, 500),
        primary_at(3, E2, P2, 500),
        primary_at(5, E3, P3, 100),
    ];
    let reconciler = Reconciler::new(MemoryContactRepository::with_contacts(seeded).unwrap());

    let tied = reconciler.identify(Some(E1), Some(P2)).unwrap();
    assert_eq!(tied.primary_contact_id, 3);

    let oldest = reconciler.identify(Some(E2), Some(P3)).unwrap();
    assert_eq!(oldest.primary_contact_id, 5);
    assert_eq!(oldest.secondary_contact_ids, vec![3, 7]);
    assert_no_multi_level_links_in(&reconciler, &[3, 5, 7]);
}

#[test]
fn soft_deleted_contacts_do_not_match() {
    let conn = open_db_in_memory().unwrap();
    let reconciler = sqlite_reconciler(&conn);

    let first = reconciler.identify(Some(E1), Some(P1)).unwrap();
    conn.execute(
        "UPDATE contacts SET deleted_at = 1 WHERE id = ?1;",
        [first.primary_contact_id],
    )
    .unwrap();

    let fresh = reconciler.identify(Some(E1), Some(P1)).unwrap();
    assert_ne!(fresh.primary_contact_id, first.primary_contact_id);
    assert!(fresh.secondary_contact_ids.is_empty());
}

#[test]
fn group_without_live_primary_fails_and_rolls_back() {
    let conn = open_db_in_memory().unwrap();
    let reconciler = sqlite_reconciler(&conn);

    let view = reconciler.identify(Some(E1), Some(P1)).unwrap();
    reconciler.identify(Some(E2), Some(P1)).unwrap();
    conn.execute(
        "UPDATE contacts SET deleted_at = 1 WHERE id = ?1;",
        [view.primary_contact_id],
    )
    .unwrap();
    let before = reconciler.store().count_contacts().unwrap();

    let err = reconciler.identify(Some(E2), Some(P3)).unwrap_err();
    match err {
        IdentifyError::MissingPrimary { group_root } => {
            assert_eq!(group_root, view.primary_contact_id)
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(reconciler.store().count_contacts().unwrap(), before);
}

#[test]
fn concurrent_identify_calls_on_one_file_create_one_primary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.db");
    // Open sequentially so migrations run once before any writer starts.
    let connections: Vec<Connection> = (0..4)
        .map(|_| identity_core::db::open_db(&path).unwrap())
        .collect();

    std::thread::scope(|scope| {
        for conn in connections {
            scope.spawn(move || {
                let reconciler = sqlite_reconciler(&conn);
                for _ in 0..5 {
                    reconciler.identify(Some(E1), Some(P1)).unwrap();
                }
            });
        }
    });

    let conn = identity_core::db::open_db(&path).unwrap();
    let reconciler = sqlite_reconciler(&conn);
    assert_eq!(reconciler.store().count_contacts().unwrap(), 1);
}

fn primary_at(id: i64, email: &str, phone: &str, created_at: i64) -> Contact {
    Contact {
        id,
        email: Some(email.to_string()),
        phone_number: Some(phone.to_string()),
        linked_id: None,
        link_precedence: LinkPrecedence::Primary,
        created_at,
        updated_at: created_at,
        deleted_at: None,
    }
}

fn assert_no_multi_level_links_in(reconciler: &Reconciler<MemoryContactRepository>, ids: &[i64]) {
    for &id in ids {
        let contact = stored(reconciler, id);
        if let Some(linked_id) = contact.linked_id {
            assert!(stored(reconciler, linked_id).is_primary());
        }
    }
}

fn set_created_at(conn: &Connection, id: i64, created_at: i64) {
    conn.execute(
        "UPDATE contacts SET created_at = ?1 WHERE id = ?2;",
        params![created_at, id],
    )
    .unwrap();
}

//! Integration tests for the change journal
//!
//! Tests ordering and sequence numbers of recorded store changes.

use voxelsync_foundation::Value;
use voxelsync_storage::ChangeKind;

use crate::store;

#[test]
fn changes_arrive_in_mutation_order() {
    let mut store = store();
    let health = store.library().resolve("health").unwrap();
    let e = store.create();
    store.attach(e, health, Value::Int(1)).unwrap();
    store.attach(e, health, Value::Int(2)).unwrap();
    store.remove(e, health).unwrap();
    store.destroy(e).unwrap();

    let kinds: Vec<_> = store.changes_since(0).iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ChangeKind::Created(e),
            ChangeKind::Attached(e, health),
            ChangeKind::Changed(e, health),
            ChangeKind::Removed(e, health),
            ChangeKind::Destroyed(e),
        ]
    );
    assert!(store.changes_since(0).iter().all(|c| c.kind.entity() == e));
}

#[test]
fn removing_an_absent_component_records_nothing() {
    let mut store = store();
    let health = store.library().resolve("health").unwrap();
    let e = store.create();
    let before = store.last_seq();

    assert_eq!(store.remove(e, health).unwrap(), None);
    assert_eq!(store.last_seq(), before);
}

#[test]
fn sequence_survives_truncation() {
    let mut store = store();
    store.create();
    store.create();
    let taken = store.take_changes();
    assert_eq!(taken.len(), 2);
    assert_eq!(taken[1].seq, 2);

    store.create();
    let rest = store.changes_since(0);
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].seq, 3);
    assert!(store.changes_since(3).is_empty());
}

#[test]
fn changes_since_skips_what_a_reader_has_seen() {
    let mut store = store();
    let a = store.create();
    let seen = store.last_seq();
    let b = store.create();

    let unseen: Vec<_> = store.changes_since(seen).iter().map(|c| c.kind).collect();
    assert_eq!(unseen, vec![ChangeKind::Created(b)]);
    assert_ne!(a, b);
}

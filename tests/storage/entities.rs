//! Integration tests for entity handles and components
//!
//! Tests handle validation after destroy and component bookkeeping.

use proptest::prelude::*;
use voxelsync_foundation::{ComponentKind, ErrorKind, Value};

use crate::store;

fn kind(store: &voxelsync_storage::EntityManager, name: &str) -> ComponentKind {
    store.library().resolve(name).unwrap()
}

// =============================================================================
// Stale Handles
// =============================================================================

#[test]
fn destroyed_handle_fails_every_operation() {
    let mut store = store();
    let health = kind(&store, "health");
    let e = store.create_with([(health, Value::Int(10))]).unwrap();
    store.destroy(e).unwrap();

    assert!(store.get(e, health).unwrap_err().is_dangling_entity());
    assert!(store.attach(e, health, Value::Int(1)).unwrap_err().is_dangling_entity());
    assert!(store.remove(e, health).unwrap_err().is_dangling_entity());
    assert!(store.has(e, health).unwrap_err().is_dangling_entity());
    assert!(store.destroy(e).unwrap_err().is_dangling_entity());
}

#[test]
fn reused_slot_does_not_revive_old_handle() {
    let mut store = store();
    let health = kind(&store, "health");
    let old = store.create();
    store.destroy(old).unwrap();
    let new = store.create();
    store.attach(new, health, Value::Int(5)).unwrap();

    assert!(!store.is_alive(old));
    assert!(store.is_alive(new));
    assert_ne!(old, new);
    assert!(store.get(old, health).is_err());
    assert_eq!(store.get(new, health).unwrap(), Some(&Value::Int(5)));
}

#[test]
fn null_handle_is_never_alive() {
    let store = store();
    assert!(!store.is_alive(voxelsync_foundation::EntityId::null()));
}

// =============================================================================
// Components
// =============================================================================

#[test]
fn attach_replaces_and_returns_previous() {
    let mut store = store();
    let health = kind(&store, "health");
    let e = store.create();

    assert_eq!(store.attach(e, health, Value::Int(1)).unwrap(), None);
    assert_eq!(
        store.attach(e, health, Value::Int(2)).unwrap(),
        Some(Value::Int(1))
    );
    assert_eq!(store.get(e, health).unwrap(), Some(&Value::Int(2)));
}

#[test]
fn modify_requires_an_attached_component() {
    let mut store = store();
    let health = kind(&store, "health");
    let e = store.create();

    let err = store.modify(e, health, |_| {}).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::ComponentNotFound { .. }));

    store.attach(e, health, Value::Int(3)).unwrap();
    store
        .modify(e, health, |v| {
            if let Value::Int(n) = v {
                *n -= 1;
            }
        })
        .unwrap();
    assert_eq!(store.get(e, health).unwrap(), Some(&Value::Int(2)));
}

#[test]
fn with_component_lists_only_carriers() {
    let mut store = store();
    let position = kind(&store, "position");
    let a = store.create();
    let b = store.create();
    let c = store.create();
    store.attach(a, position, Value::Int(0)).unwrap();
    store.attach(c, position, Value::Int(0)).unwrap();
    store.destroy(c).unwrap();

    let carriers: Vec<_> = store.with_component(position).collect();
    assert_eq!(carriers, vec![a]);
    assert!(store.is_alive(b));
}

#[test]
fn unknown_kind_creates_nothing() {
    let mut store = store();
    let health = kind(&store, "health");
    let bogus = ComponentKind::from_index(99);

    let err = store
        .create_with([(health, Value::Int(1)), (bogus, Value::Nil)])
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownComponent(_)));
    assert_eq!(store.entity_count(), 0);
}

#[test]
fn clear_leaves_old_handles_stale() {
    let mut store = store();
    let e = store.create();
    store.clear();

    assert_eq!(store.entity_count(), 0);
    assert!(!store.is_alive(e));
    assert!(store.changes_since(0).is_empty());
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    /// `None` creates an entity, `Some(n)` destroys the `n`th live one.
    #[test]
    fn handles_follow_creates_and_destroys(
        ops in prop::collection::vec(any::<Option<u8>>(), 1..64),
    ) {
        let mut store = store();
        let health = kind(&store, "health");
        let mut live = Vec::new();
        let mut dead = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Some(n) if !live.is_empty() => {
                    let (e, _) = live.remove(usize::from(n) % live.len());
                    store.destroy(e).unwrap();
                    dead.push(e);
                }
                _ => {
                    let hp = Value::Int(i64::try_from(step).unwrap());
                    let e = store.create_with([(health, hp.clone())]).unwrap();
                    prop_assert!(!dead.contains(&e));
                    live.push((e, hp));
                }
            }
        }

        prop_assert_eq!(store.entity_count(), live.len());
        prop_assert_eq!(store.with_component(health).count(), live.len());
        for (e, hp) in &live {
            prop_assert_eq!(store.get(*e, health).unwrap(), Some(hp));
        }
        for e in &dead {
            prop_assert!(!store.is_alive(*e));
        }
    }
}

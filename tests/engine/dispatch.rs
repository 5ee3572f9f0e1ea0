//! Integration tests for event dispatch
//!
//! Tests breadth-first ordering, dead targets, and replication buffering.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use voxelsync_engine::{Event, EventSystem, Target};
use voxelsync_foundation::{ErrorKind, EventKind, Limit, Value};
use voxelsync_storage::{ComponentLibrary, EntityManager, EventDef, EventLibrary};

struct Kinds {
    a: EventKind,
    b: EventKind,
    c: EventKind,
    d: EventKind,
}

fn fixture() -> (EventSystem, EntityManager, Kinds) {
    let mut lib = EventLibrary::new();
    let kinds = Kinds {
        a: lib.register(EventDef::new("a")).unwrap(),
        b: lib.register(EventDef::new("b").replicable()).unwrap(),
        c: lib.register(EventDef::new("c")).unwrap(),
        d: lib.register(EventDef::new("d")).unwrap(),
    };
    (
        EventSystem::new(Arc::new(lib)),
        EntityManager::new(Arc::new(ComponentLibrary::new())),
        kinds,
    )
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn nested_events_run_after_their_siblings() {
    let (mut events, mut store, k) = fixture();
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    let (b, c, d) = (k.b, k.c, k.d);
    let l = log.clone();
    events.subscribe(k.a, move |_, _, ctx| {
        l.borrow_mut().push("a");
        ctx.publish(Event::new(b, Value::Nil), Target::Broadcast)?;
        ctx.publish(Event::new(c, Value::Nil), Target::Broadcast)
    });
    let l = log.clone();
    events.subscribe(k.b, move |_, _, ctx| {
        l.borrow_mut().push("b");
        ctx.publish(Event::new(d, Value::Nil), Target::Broadcast)
    });
    for (kind, name) in [(k.c, "c"), (k.d, "d")] {
        let l = log.clone();
        events.subscribe(kind, move |_, _, _| {
            l.borrow_mut().push(name);
            Ok(())
        });
    }

    events
        .publish(Event::new(k.a, Value::Nil), Target::Broadcast)
        .unwrap();
    let stats = events.process(&mut store).unwrap();

    assert_eq!(*log.borrow(), vec!["a", "b", "c", "d"]);
    assert_eq!(stats.passes, 3);
    assert_eq!(stats.delivered, 4);
}

#[test]
fn self_feeding_handler_is_cut_off() {
    let (events, mut store, k) = fixture();
    let mut events = events.with_max_passes(5);
    let a = k.a;
    events.subscribe(a, move |_, _, ctx| {
        ctx.publish(Event::new(a, Value::Nil), Target::Broadcast)
    });
    events
        .publish(Event::new(a, Value::Nil), Target::Broadcast)
        .unwrap();

    let err = events.process(&mut store).unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::LimitExceeded(Limit::MaxDispatchPasses { limit: 5, .. })
    ));
}

// =============================================================================
// Targets and Replication
// =============================================================================

#[test]
fn events_for_destroyed_entities_are_dropped() {
    let (mut events, mut store, k) = fixture();
    let hits = Rc::new(RefCell::new(0));
    let h = hits.clone();
    events.subscribe(k.c, move |_, _, _| {
        *h.borrow_mut() += 1;
        Ok(())
    });

    let alive = store.create();
    let dead = store.create();
    store.destroy(dead).unwrap();
    events
        .publish(Event::new(k.c, Value::Nil), Target::Entity(alive))
        .unwrap();
    events
        .publish(Event::new(k.c, Value::Nil), Target::Entity(dead))
        .unwrap();

    let stats = events.process(&mut store).unwrap();
    assert_eq!(*hits.borrow(), 1);
    assert_eq!(stats.dropped, 1);
}

#[test]
fn only_replicable_events_are_buffered_for_the_network() {
    let (mut events, mut store, k) = fixture();
    let origin = store.create();
    events
        .publish(
            Event::new(k.b, Value::from("hi")).from_entity(origin),
            Target::Broadcast,
        )
        .unwrap();
    events
        .publish(Event::new(k.c, Value::Nil), Target::Broadcast)
        .unwrap();
    events.process(&mut store).unwrap();

    let out = events.drain_replicated();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].event.kind, k.b);
    assert_eq!(out[0].event.origin, Some(origin));
    assert!(events.drain_replicated().is_empty());
}

#[test]
fn change_subscribers_see_handler_mutations() {
    let (mut events, mut store, k) = fixture();
    let seen = Rc::new(RefCell::new(0));
    let s = seen.clone();
    events.subscribe_changes(move |_, _| {
        *s.borrow_mut() += 1;
        Ok(())
    });
    events.subscribe(k.a, |_, _, ctx| {
        ctx.store_mut().create();
        Ok(())
    });

    store.create();
    events
        .publish(Event::new(k.a, Value::Nil), Target::Broadcast)
        .unwrap();
    let stats = events.process(&mut store).unwrap();

    assert_eq!(*seen.borrow(), 2);
    assert_eq!(stats.changes, 2);
}

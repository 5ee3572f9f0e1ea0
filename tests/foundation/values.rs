//! Integration tests for Value types
//!
//! Tests records, entity reference rewriting, and position encoding.

use voxelsync_foundation::{EntityId, SharedVec, Value, Vec3};

// =============================================================================
// Records
// =============================================================================

#[test]
fn record_fields_are_readable() {
    let v = Value::record([("hp", Value::Int(3)), ("name", Value::from("ogre"))]);
    assert_eq!(v.field("hp"), Some(&Value::Int(3)));
    assert_eq!(v.field("name").and_then(Value::as_str), Some("ogre"));
    assert_eq!(v.field("missing"), None);
    assert_eq!(Value::Int(1).field("hp"), None);
}

#[test]
fn nan_equals_itself() {
    assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    assert_ne!(Value::Float(0.0), Value::Float(-0.0));
}

// =============================================================================
// Entity References
// =============================================================================

#[test]
fn remap_reaches_nested_references() {
    let old = EntityId::new(1, 1);
    let new = EntityId::new(5, 1);
    let v = Value::record([
        ("owner", Value::EntityRef(old)),
        (
            "party",
            Value::Vec(
                SharedVec::new()
                    .with(Value::EntityRef(old))
                    .with(Value::Int(2)),
            ),
        ),
    ]);

    let remapped = v.remap_entities(&mut |e| if e == old { new } else { e });

    let mut seen = Vec::new();
    remapped.visit_entities(&mut |e| seen.push(e));
    assert_eq!(seen, vec![new, new]);
    assert_eq!(
        remapped.field("party").and_then(Value::as_vec).map(SharedVec::len),
        Some(2)
    );
}

#[test]
fn remap_leaves_plain_values_alone() {
    let v = Value::from("plain");
    assert_eq!(v.remap_entities(&mut |_| EntityId::null()), v);
}

// =============================================================================
// Positions
// =============================================================================

#[test]
fn position_record_decodes() {
    let p = Vec3::new(1.5, -2.0, 64.0);
    assert_eq!(Vec3::from_value(&p.to_value()), Some(p));
}

#[test]
fn incomplete_position_is_rejected() {
    let v = Value::record([("x", Value::Int(1)), ("y", Value::Int(2))]);
    assert_eq!(Vec3::from_value(&v), None);
    assert_eq!(Vec3::from_value(&Value::Nil), None);
}

//! Integration tests for region math
//!
//! Tests region lookup, view boxes, and incremental box differences.

use std::collections::BTreeSet;

use voxelsync_foundation::{RegionBox, RegionPos, RegionSize, Vec3};

#[test]
fn positions_map_to_regions_with_floor_semantics() {
    let size = RegionSize::new(16, 32, 16);
    assert_eq!(size.region_of(Vec3::new(0.0, 0.0, 0.0)), RegionPos::new(0, 0, 0));
    assert_eq!(size.region_of(Vec3::new(15.9, 31.9, 15.9)), RegionPos::new(0, 0, 0));
    assert_eq!(size.region_of(Vec3::new(-0.1, 32.0, 16.0)), RegionPos::new(-1, 1, 1));
}

#[test]
fn view_box_is_inclusive() {
    let b = RegionBox::around(RegionPos::new(0, 0, 0), 2, 1);
    assert_eq!(b.len(), 5 * 3 * 5);
    assert!(b.contains(RegionPos::new(2, 1, -2)));
    assert!(!b.contains(RegionPos::new(3, 0, 0)));
    assert_eq!(b.iter().count(), b.len());
}

#[test]
fn zero_radius_box_holds_one_region() {
    let b = RegionBox::around(RegionPos::new(4, -1, 9), 0, 0);
    assert_eq!(b.iter().collect::<Vec<_>>(), vec![RegionPos::new(4, -1, 9)]);
}

#[test]
fn difference_of_a_step_is_one_slab() {
    let before = RegionBox::around(RegionPos::new(0, 0, 0), 3, 1);
    let after = RegionBox::around(RegionPos::new(1, 0, 0), 3, 1);

    let entered: usize = after.difference(&before).iter().map(RegionBox::len).sum();
    let exited: usize = before.difference(&after).iter().map(RegionBox::len).sum();
    assert_eq!(entered, 7 * 3);
    assert_eq!(exited, 7 * 3);
}

#[test]
fn difference_matches_set_difference() {
    let a = RegionBox::around(RegionPos::new(0, 0, 0), 2, 1);
    let b = RegionBox::around(RegionPos::new(1, 1, -2), 1, 2);

    let expected: BTreeSet<RegionPos> = a.iter().filter(|p| !b.contains(*p)).collect();
    let parts = a.difference(&b);
    let actual: BTreeSet<RegionPos> = parts.iter().flat_map(RegionBox::iter).collect();
    let total: usize = parts.iter().map(RegionBox::len).sum();

    assert_eq!(actual, expected);
    assert_eq!(total, expected.len(), "parts must not overlap");
}

#[test]
fn disjoint_difference_is_the_whole_box() {
    let a = RegionBox::around(RegionPos::new(0, 0, 0), 1, 0);
    let b = RegionBox::around(RegionPos::new(10, 0, 0), 1, 0);
    assert_eq!(a.difference(&b), vec![a]);
    assert!(a.difference(&a).is_empty());
}

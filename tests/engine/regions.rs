//! Integration tests for region tracking
//!
//! Tests observer deltas, shared regions, and view distance extremes.

use voxelsync_engine::{RegionConfig, RegionTracker, ViewDistance};
use voxelsync_foundation::{ClientId, RegionPos, RegionSize, Vec3};

fn tracker() -> RegionTracker {
    RegionTracker::new(RegionConfig {
        size: RegionSize::new(16, 16, 16),
        vertical_radius: 1,
    })
}

#[test]
fn same_position_twice_changes_nothing() {
    let mut t = tracker();
    let first = t.update_observer_position(ClientId(1), Vec3::new(8.0, 8.0, 8.0), ViewDistance::new(1));
    assert_eq!(first.entered.len(), 27);

    let again = t.update_observer_position(ClientId(1), Vec3::new(9.0, 3.0, 1.0), ViewDistance::new(1));
    assert!(again.is_empty());
}

#[test]
fn view_distance_scales_the_visible_box() {
    let t = tracker();
    let origin = Vec3::new(0.0, 0.0, 0.0);
    assert_eq!(t.visible_box(origin, ViewDistance::new(1)).len(), 3 * 3 * 3);
    assert_eq!(
        t.visible_box(origin, ViewDistance::new(100)).len(),
        201 * 3 * 201
    );
    assert_eq!(t.visible_box(origin, ViewDistance::LEGALLY_BLIND).len(), 3);
}

#[test]
fn crossing_a_boundary_trades_one_slab() {
    let mut t = tracker();
    let d = ViewDistance::new(1);
    t.update_observer_position(ClientId(1), Vec3::new(8.0, 8.0, 8.0), d);
    let delta = t.update_observer_position(ClientId(1), Vec3::new(24.0, 8.0, 8.0), d);

    assert_eq!(delta.entered.len(), 9);
    assert_eq!(delta.exited.len(), 9);
    assert!(delta.entered.iter().all(|p| p.x == 2));
    assert!(delta.exited.iter().all(|p| p.x == -1));
}

#[test]
fn last_observer_leaving_evicts_the_region() {
    let mut t = tracker();
    let d = ViewDistance::LEGALLY_BLIND;
    let here = Vec3::new(1.0, 1.0, 1.0);
    t.update_observer_position(ClientId(1), here, d);
    t.update_observer_position(ClientId(2), here, d);
    let origin = RegionPos::new(0, 0, 0);

    t.remove_observer(ClientId(1));
    assert!(t.is_observed(origin));
    assert_eq!(t.observers_of(origin).collect::<Vec<_>>(), vec![ClientId(2)]);
    assert!(t.take_evicted().is_empty());

    let released = t.remove_observer(ClientId(2));
    assert!(released.contains(&origin));
    assert!(!t.is_observed(origin));
    assert!(t.take_evicted().contains(&origin));
}

#[test]
fn pending_work_delays_eviction() {
    let mut t = tracker();
    let origin = RegionPos::new(0, 0, 0);
    t.update_observer_position(ClientId(1), Vec3::new(1.0, 1.0, 1.0), ViewDistance::LEGALLY_BLIND);
    t.add_pending_work(origin);
    t.remove_observer(ClientId(1));
    assert!(!t.take_evicted().contains(&origin));

    t.complete_pending_work(origin);
    assert_eq!(t.take_evicted(), vec![origin]);
}

#[test]
fn shrinking_view_distance_releases_the_rim() {
    let mut t = tracker();
    t.update_observer_position(ClientId(1), Vec3::new(1.0, 1.0, 1.0), ViewDistance::new(2));
    let delta = t.set_view_distance(ClientId(1), ViewDistance::new(1)).unwrap();
    assert!(delta.entered.is_empty());
    assert_eq!(delta.exited.len(), 5 * 3 * 5 - 3 * 3 * 3);
    assert!(t.set_view_distance(ClientId(9), ViewDistance::NEAR).is_none());
}

//! Integration tests for the spatial index
//!
//! Tests that journal-driven sync follows entities across regions.

use std::sync::Arc;

use voxelsync_engine::{EntityMove, SpatialIndex};
use voxelsync_foundation::{RegionBox, RegionPos, RegionSize, Vec3};
use voxelsync_storage::{ComponentDef, ComponentLibrary, EntityManager};

fn setup() -> (EntityManager, SpatialIndex) {
    let mut lib = ComponentLibrary::new();
    let position = lib.register(ComponentDef::new("position")).unwrap();
    (
        EntityManager::new(Arc::new(lib)),
        SpatialIndex::new(position, RegionSize::new(10, 10, 10)),
    )
}

#[test]
fn sync_reports_region_changes_only() {
    let (mut store, mut index) = setup();
    let position = index.position_kind();
    let e = store
        .create_with([(position, Vec3::new(1.0, 1.0, 1.0).to_value())])
        .unwrap();
    let origin = RegionPos::new(0, 0, 0);

    assert_eq!(
        index.sync(&store),
        vec![EntityMove {
            entity: e,
            from: None,
            to: Some(origin),
        }]
    );

    store
        .attach(e, position, Vec3::new(5.0, 5.0, 5.0).to_value())
        .unwrap();
    assert!(index.sync(&store).is_empty());

    store
        .attach(e, position, Vec3::new(-1.0, 5.0, 5.0).to_value())
        .unwrap();
    let moves = index.sync(&store);
    assert_eq!(moves[0].to, Some(RegionPos::new(-1, 0, 0)));

    store.destroy(e).unwrap();
    assert_eq!(index.sync(&store)[0].to, None);
    assert_eq!(index.region_of(e), None);
}

#[test]
fn rebuild_matches_incremental_sync() {
    let (mut store, mut incremental) = setup();
    let position = incremental.position_kind();
    for i in 0..20 {
        let p = Vec3::new(i as f32 * 7.0, 0.0, 0.0);
        store.create_with([(position, p.to_value())]).unwrap();
    }
    incremental.sync(&store);

    let (_, mut rebuilt) = setup();
    rebuilt.rebuild(&store);

    let area = RegionBox::new(RegionPos::new(0, 0, 0), RegionPos::new(20, 0, 0));
    let mut a = incremental.entities_in_box(area);
    let mut b = rebuilt.entities_in_box(area);
    a.sort();
    b.sort();
    assert_eq!(a, b);
    assert_eq!(a.len(), 20);
}

//! Integration tests for world saves
//!
//! Tests snapshot consistency, sequential saves, and the read-only manager.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, bounded};
use voxelsync_engine::Chunk;
use voxelsync_foundation::{ErrorKind, RegionPos, Result, Value};
use voxelsync_persistence::{
    MessagePackWriter, ReadOnlyStorageManager, ReadWriteStorageManager, SavePaths, SaveWriter,
    StorageManager, StorageNotification, WorldManifest,
};
use voxelsync_storage::EntityRecord;

use crate::{paths, snapshot, store};

/// Writes through to the real format, holding each manifest write until released.
struct GatedWriter {
    release: Receiver<()>,
}

impl GatedWriter {
    fn new() -> (Self, Sender<()>) {
        let (tx, rx) = bounded(8);
        (Self { release: rx }, tx)
    }
}

impl SaveWriter for GatedWriter {
    fn write_manifest(&self, paths: &SavePaths, manifest: &WorldManifest) -> Result<()> {
        let _ = self.release.recv();
        MessagePackWriter.write_manifest(paths, manifest)
    }

    fn write_entities(&self, paths: &SavePaths, records: &[EntityRecord]) -> Result<()> {
        MessagePackWriter.write_entities(paths, records)
    }

    fn write_chunk(&self, paths: &SavePaths, chunk: &Chunk) -> Result<()> {
        MessagePackWriter.write_chunk(paths, chunk)
    }

    fn read_manifest(&self, paths: &SavePaths) -> Result<Option<WorldManifest>> {
        MessagePackWriter.read_manifest(paths)
    }

    fn read_entities(&self, paths: &SavePaths) -> Result<Vec<EntityRecord>> {
        MessagePackWriter.read_entities(paths)
    }

    fn read_chunk(&self, paths: &SavePaths, pos: RegionPos) -> Result<Option<Chunk>> {
        MessagePackWriter.read_chunk(paths, pos)
    }
}

// =============================================================================
// Consistency
// =============================================================================

#[test]
fn save_writes_the_state_at_snapshot_time() {
    let paths = paths("consistent");
    let (writer, release) = GatedWriter::new();
    let mut storage =
        ReadWriteStorageManager::with_writer(paths.clone(), Arc::new(writer)).unwrap();
    let (mut store, health) = store();
    for n in 0..5 {
        store.create_with([(health, Value::Int(n))]).unwrap();
    }

    storage
        .wait_for_completion_of_previous_save_and_start_saving(snapshot(&store, 1))
        .unwrap();
    assert!(storage.is_saving());

    // The simulation keeps going while the save is in flight.
    let first = store.entities().next().unwrap();
    store.destroy(first).unwrap();
    store.create_with([(health, Value::Int(99))]).unwrap();
    storage.update();
    assert!(storage.is_saving());

    release.send(()).unwrap();
    storage.wait_for_completion();
    assert!(!storage.is_saving());

    let manifest = storage.load_manifest().unwrap().unwrap();
    assert_eq!(manifest.entity_count, 5);
    let mut values: Vec<_> = storage
        .load_entities()
        .unwrap()
        .into_iter()
        .filter_map(|r| match r.components.get("health") {
            Some(Value::Int(n)) => Some(*n),
            _ => None,
        })
        .collect();
    values.sort_unstable();
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
    storage.finish_saving_and_shutdown();
    let _ = std::fs::remove_dir_all(paths.world_dir());
}

#[test]
fn later_save_replaces_the_earlier_one() {
    let paths = paths("sequential");
    let mut storage = ReadWriteStorageManager::open(paths.clone()).unwrap();
    let (mut store, health) = store();
    store.create_with([(health, Value::Int(1))]).unwrap();
    storage
        .wait_for_completion_of_previous_save_and_start_saving(snapshot(&store, 10))
        .unwrap();

    store.create_with([(health, Value::Int(2))]).unwrap();
    storage
        .wait_for_completion_of_previous_save_and_start_saving(snapshot(&store, 20))
        .unwrap();
    storage.finish_saving_and_shutdown();

    let notes = storage.take_notifications();
    assert_eq!(notes.len(), 2);
    assert!(matches!(
        notes[1],
        StorageNotification::SaveCompleted { entities: 2, .. }
    ));
    assert_eq!(storage.saves_completed(), 2);

    let reader = ReadWriteStorageManager::open(paths.clone()).unwrap();
    let manifest = reader.load_manifest().unwrap().unwrap();
    assert_eq!((manifest.tick, manifest.entity_count), (20, 2));
    assert_eq!(manifest.seed, 11);
    let _ = std::fs::remove_dir_all(paths.world_dir());
}

#[test]
fn fresh_world_has_nothing_to_load() {
    let paths = paths("fresh");
    let storage = ReadWriteStorageManager::open(paths).unwrap();
    assert_eq!(storage.load_manifest().unwrap(), None);
    assert!(storage.load_entities().unwrap().is_empty());
}

#[test]
fn reload_drops_transient_components_and_keeps_references() {
    let paths = paths("reload");
    let (mut store, health) = store();
    let scratch = store.library().resolve("scratch").unwrap();
    let leader = store.create_with([(health, Value::Int(30)), (scratch, Value::Bool(true))]).unwrap();
    let follower = store.create_with([(health, Value::EntityRef(leader))]).unwrap();

    let mut storage = ReadWriteStorageManager::open(paths.clone()).unwrap();
    storage
        .wait_for_completion_of_previous_save_and_start_saving(snapshot(&store, 3))
        .unwrap();
    storage.finish_saving_and_shutdown();

    let (mut loaded, health) = crate::store();
    let ids = loaded.restore(&storage.load_entities().unwrap()).unwrap();
    assert_eq!(loaded.entity_count(), 2);
    assert_eq!(
        loaded.get(ids[&follower], health).unwrap(),
        Some(&Value::EntityRef(ids[&leader]))
    );
    assert_eq!(loaded.components_of(ids[&leader]).unwrap(), &[health]);
    let _ = std::fs::remove_dir_all(paths.world_dir());
}

// =============================================================================
// Shutdown
// =============================================================================

#[test]
fn shutdown_waits_for_the_save_in_flight() {
    let paths = paths("shutdown");
    let (writer, release) = GatedWriter::new();
    let mut storage =
        ReadWriteStorageManager::with_writer(paths.clone(), Arc::new(writer)).unwrap();
    let (store, _) = store();
    storage
        .wait_for_completion_of_previous_save_and_start_saving(snapshot(&store, 5))
        .unwrap();

    let releaser = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        release.send(()).unwrap();
    });
    storage.finish_saving_and_shutdown();
    releaser.join().unwrap();

    assert!(storage.is_shut_down());
    assert_eq!(storage.saves_completed(), 1);
    assert_eq!(storage.load_manifest().unwrap().map(|m| m.tick), Some(5));
    let err = storage
        .wait_for_completion_of_previous_save_and_start_saving(snapshot(&store, 6))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidTransition { .. }));
    let _ = std::fs::remove_dir_all(paths.world_dir());
}

#[test]
fn read_only_storage_accepts_and_ignores() {
    let mut storage: Box<dyn StorageManager> = Box::new(ReadOnlyStorageManager::new());
    let (store, _) = store();
    storage
        .wait_for_completion_of_previous_save_and_start_saving(snapshot(&store, 1))
        .unwrap();
    assert!(!storage.is_saving());
    assert!(storage.load_manifest().unwrap().is_none());
    assert!(storage.chunk_source().is_none());
    storage.finish_saving_and_shutdown();
    storage.finish_saving_and_shutdown();
    assert!(storage.is_shut_down());
    assert!(storage.take_notifications().is_empty());
}

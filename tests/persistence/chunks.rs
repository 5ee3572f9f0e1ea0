//! Integration tests for chunk storage
//!
//! Tests chunks written by saves and by eviction, read back by the provider.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, bounded};
use voxelsync_engine::{
    Chunk, ChunkProvider, RegionChunkProvider, WorldGenerator,
};
use voxelsync_foundation::{Error, RegionPos, RegionSize, Result};
use voxelsync_persistence::{
    MessagePackWriter, ReadWriteStorageManager, SavePaths, SaveWriter, StorageManager,
    StorageNotification, WorldManifest, WorldSnapshot,
};
use voxelsync_storage::EntityRecord;

use crate::{paths, store};

const SIZE: RegionSize = RegionSize::new(4, 4, 4);

/// Holds each chunk write until released, then writes it or fails.
struct HeldChunkWriter {
    release: Receiver<()>,
    fail: bool,
}

impl HeldChunkWriter {
    fn new(fail: bool) -> (Self, Sender<()>) {
        let (tx, rx) = bounded(8);
        (Self { release: rx, fail }, tx)
    }
}

impl SaveWriter for HeldChunkWriter {
    fn write_manifest(&self, paths: &SavePaths, manifest: &WorldManifest) -> Result<()> {
        MessagePackWriter.write_manifest(paths, manifest)
    }

    fn write_entities(&self, paths: &SavePaths, records: &[EntityRecord]) -> Result<()> {
        MessagePackWriter.write_entities(paths, records)
    }

    fn write_chunk(&self, paths: &SavePaths, chunk: &Chunk) -> Result<()> {
        let _ = self.release.recv();
        if self.fail {
            return Err(Error::io("disk full"));
        }
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

/// Edits a chunk, saves it with `storage`, then evicts it while the save is held.
fn save_then_evict(storage: &mut ReadWriteStorageManager, pos: RegionPos) -> RegionChunkProvider {
    let (store, _) = store();
    let mut provider = RegionChunkProvider::new(SIZE, WorldGenerator::new(5))
        .with_source(storage.chunk_source().unwrap());
    provider.on_region_entered(pos).unwrap();
    provider.chunk_mut(pos).unwrap().set(1, 2, 3, 55);

    storage
        .wait_for_completion_of_previous_save_and_start_saving(WorldSnapshot::new(
            WorldManifest::new("world", "Chunks", 1),
            store.snapshot(),
            provider.take_dirty_chunks(),
        ))
        .unwrap();
    // Clean now, so eviction hands nothing to the sink.
    provider.on_region_evicted(pos, storage.chunk_sink()).unwrap();
    provider
}

#[test]
fn evicted_chunks_come_back_through_the_provider() {
    let paths = paths("evict");
    let pos = RegionPos::new(2, 0, -1);
    let mut storage = ReadWriteStorageManager::open(paths.clone()).unwrap();

    let mut provider = RegionChunkProvider::new(SIZE, WorldGenerator::new(5))
        .with_source(storage.chunk_source().unwrap());
    provider.on_region_entered(pos).unwrap();
    provider.chunk_mut(pos).unwrap().set(3, 3, 3, 77);
    provider.on_region_evicted(pos, storage.chunk_sink()).unwrap();
    assert_eq!(provider.loaded_count(), 0);

    // Readable while the write may still be queued.
    provider.on_region_entered(pos).unwrap();
    assert_eq!(provider.chunk(pos).unwrap().get(3, 3, 3), Some(77));
    storage.finish_saving_and_shutdown();

    let reopened = ReadWriteStorageManager::open(paths.clone()).unwrap();
    let stored = reopened.load_chunk(pos).unwrap().unwrap();
    assert_eq!(stored.get(3, 3, 3), Some(77));
    let _ = std::fs::remove_dir_all(paths.world_dir());
}

#[test]
fn world_save_includes_dirty_chunks() {
    let paths = paths("save_chunks");
    let mut storage = ReadWriteStorageManager::open(paths.clone()).unwrap();
    let (store, _) = store();
    let mut chunk = Chunk::new(RegionPos::new(0, 1, 0), SIZE);
    chunk.set(0, 0, 0, 4);

    storage
        .wait_for_completion_of_previous_save_and_start_saving(WorldSnapshot::new(
            WorldManifest::new("world", "Chunks", 1),
            store.snapshot(),
            vec![chunk.clone()],
        ))
        .unwrap();
    storage.wait_for_completion();

    let stored = storage.load_chunk(chunk.pos()).unwrap().unwrap();
    assert_eq!(stored.blocks(), chunk.blocks());
    assert!(storage.load_chunk(RegionPos::new(9, 9, 9)).unwrap().is_none());
    storage.finish_saving_and_shutdown();
    let _ = std::fs::remove_dir_all(paths.world_dir());
}

#[test]
fn chunk_in_a_running_save_is_readable() {
    let paths = paths("save_in_flight");
    let pos = RegionPos::new(1, 0, 1);
    let (writer, release) = HeldChunkWriter::new(false);
    let mut storage =
        ReadWriteStorageManager::with_writer(paths.clone(), Arc::new(writer)).unwrap();
    let mut provider = save_then_evict(&mut storage, pos);

    provider.on_region_entered(pos).unwrap();
    assert_eq!(provider.chunk(pos).unwrap().get(1, 2, 3), Some(55));
    assert!(storage.is_saving());

    release.send(()).unwrap();
    storage.wait_for_completion();
    assert_eq!(storage.load_chunk(pos).unwrap().unwrap().get(1, 2, 3), Some(55));
    storage.finish_saving_and_shutdown();
    let _ = std::fs::remove_dir_all(paths.world_dir());
}

#[test]
fn chunk_that_failed_to_write_stays_readable() {
    let paths = paths("save_failed");
    let pos = RegionPos::new(0, 0, 3);
    let (writer, release) = HeldChunkWriter::new(true);
    let mut storage =
        ReadWriteStorageManager::with_writer(paths.clone(), Arc::new(writer)).unwrap();
    let mut provider = save_then_evict(&mut storage, pos);

    release.send(()).unwrap();
    storage.wait_for_completion();
    assert!(matches!(
        storage.take_notifications().as_slice(),
        [StorageNotification::SaveFailed { .. }]
    ));

    provider.on_region_entered(pos).unwrap();
    assert_eq!(provider.chunk(pos).unwrap().get(1, 2, 3), Some(55));
    storage.finish_saving_and_shutdown();
    let _ = std::fs::remove_dir_all(paths.world_dir());
}

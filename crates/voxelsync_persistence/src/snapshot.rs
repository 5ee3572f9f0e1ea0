//! What a save writes.

use serde::{Deserialize, Serialize};
use voxelsync_engine::Chunk;
use voxelsync_storage::{EntityRecord, StoreSnapshot};

/// Save format version written into every manifest.
pub const FORMAT_VERSION: u32 = 1;

/// World metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldManifest {
    /// Save format version.
    pub version: u32,
    /// Directory name under the save root.
    pub world_id: String,
    /// Display title.
    pub title: String,
    /// Terrain seed.
    pub seed: u64,
    /// Simulation tick the save was taken at.
    pub tick: u64,
    /// Number of entities in `entities.msgpack`.
    pub entity_count: usize,
}

impl WorldManifest {
    /// A manifest for a world that has not been saved yet.
    #[must_use]
    pub fn new(world_id: impl Into<String>, title: impl Into<String>, seed: u64) -> Self {
        Self {
            version: FORMAT_VERSION,
            world_id: world_id.into(),
            title: title.into(),
            seed,
            tick: 0,
            entity_count: 0,
        }
    }

    /// Sets the tick.
    #[must_use]
    pub fn at_tick(mut self, tick: u64) -> Self {
        self.tick = tick;
        self
    }
}

/// A consistent point-in-time view of the world, handed to the save worker.
///
/// Taking one is O(1) for the store; records are built on the worker thread,
/// so later mutations on the main thread are never observed.
#[derive(Clone, Debug)]
pub struct WorldSnapshot {
    /// World metadata. `entity_count` is filled in when written.
    pub manifest: WorldManifest,
    /// The store.
    pub store: StoreSnapshot,
    /// Dirty chunks to write alongside the entities.
    pub chunks: Vec<Chunk>,
}

impl WorldSnapshot {
    /// Captures a snapshot.
    #[must_use]
    pub fn new(manifest: WorldManifest, store: StoreSnapshot, chunks: Vec<Chunk>) -> Self {
        Self {
            manifest,
            store,
            chunks,
        }
    }

    /// Persisted entity records.
    #[must_use]
    pub fn records(&self) -> Vec<EntityRecord> {
        self.store.to_records()
    }
}

//! Storage managers.
//!
//! The authority uses [`ReadWriteStorageManager`], which saves on a background
//! [`SaveWorker`] with at most one world save in flight. Clients use
//! [`ReadOnlyStorageManager`], which never touches disk.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use voxelsync_engine::{Chunk, ChunkSink, ChunkSource, DiscardSink};
use voxelsync_foundation::{Error, RegionPos, Result};
use voxelsync_storage::EntityRecord;

use crate::paths::SavePaths;
use crate::snapshot::{WorldManifest, WorldSnapshot};
use crate::worker::{JobLabel, JobOutcome, SaveReport, SaveWorker};
use crate::writer::{MessagePackWriter, SaveWriter};

// =============================================================================
// Notifications
// =============================================================================

/// Something the session should be told about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageNotification {
    /// A world save finished.
    SaveCompleted {
        /// Entities written.
        entities: usize,
        /// Chunks written.
        chunks: usize,
        /// Time spent on the worker.
        elapsed: Duration,
    },
    /// A world save failed. Later saves are unaffected.
    SaveFailed {
        /// Why.
        reason: String,
    },
    /// A chunk unloaded from memory could not be written.
    ChunkWriteFailed {
        /// Why.
        reason: String,
    },
}

impl fmt::Display for StorageNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SaveCompleted {
                entities, chunks, ..
            } => write!(f, "saved {entities} entities and {chunks} chunks"),
            Self::SaveFailed { reason } => write!(f, "save failed: {reason}"),
            Self::ChunkWriteFailed { reason } => write!(f, "chunk write failed: {reason}"),
        }
    }
}

// =============================================================================
// Contract
// =============================================================================

/// Persists world state without blocking the tick.
pub trait StorageManager: Send {
    /// Collects finished background work. Never blocks.
    fn update(&mut self);

    /// Waits for the previous save to finish, then starts saving `snapshot`
    /// in the background and returns.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` after shutdown.
    fn wait_for_completion_of_previous_save_and_start_saving(
        &mut self,
        snapshot: WorldSnapshot,
    ) -> Result<()>;

    /// Blocks until every queued write has finished and collects the results.
    /// Does nothing after shutdown.
    fn wait_for_completion(&mut self);

    /// Waits for all background work, then releases every resource.
    /// Repeated calls do nothing.
    fn finish_saving_and_shutdown(&mut self);

    /// Returns true while a world save is in flight.
    fn is_saving(&self) -> bool;

    /// Returns true after [`Self::finish_saving_and_shutdown`].
    fn is_shut_down(&self) -> bool;

    /// Schedules a chunk leaving memory to be written.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` after shutdown.
    fn deactivate_chunk(&mut self, chunk: Chunk) -> Result<()>;

    /// Reads a stored chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data cannot be read.
    fn load_chunk(&self, pos: RegionPos) -> Result<Option<Chunk>>;

    /// Reads stored entity records.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data cannot be read.
    fn load_entities(&self) -> Result<Vec<EntityRecord>>;

    /// Reads stored world metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data cannot be read.
    fn load_manifest(&self) -> Result<Option<WorldManifest>>;

    /// Takes notifications raised since the last call.
    fn take_notifications(&mut self) -> Vec<StorageNotification>;

    /// Where the chunk provider hands evicted chunks.
    fn chunk_sink(&mut self) -> &mut dyn ChunkSink;

    /// Where the chunk provider reads stored chunks, if anywhere.
    fn chunk_source(&self) -> Option<Box<dyn ChunkSource>>;
}

// =============================================================================
// Save Gate
// =============================================================================

/// Allows one world save in flight.
#[derive(Debug, Default)]
struct SaveGate {
    in_flight: Mutex<bool>,
    idle: Condvar,
}

impl SaveGate {
    fn acquire(self: &Arc<Self>) -> GateRelease {
        let mut in_flight = self.in_flight.lock();
        while *in_flight {
            self.idle.wait(&mut in_flight);
        }
        *in_flight = true;
        GateRelease(Arc::clone(self))
    }

    fn wait_idle(&self) {
        let mut in_flight = self.in_flight.lock();
        while *in_flight {
            self.idle.wait(&mut in_flight);
        }
    }

    fn is_held(&self) -> bool {
        *self.in_flight.lock()
    }
}

/// Reopens the gate when dropped, whether the save succeeded, failed or panicked.
struct GateRelease(Arc<SaveGate>);

impl Drop for GateRelease {
    fn drop(&mut self) {
        *self.0.in_flight.lock() = false;
        self.0.idle.notify_all();
    }
}

/// Chunks handed over for writing that the worker has not written yet.
type UnsavedChunks = Arc<Mutex<HashMap<RegionPos, Chunk>>>;

/// Drops the pending copy of `written` unless a newer one was queued meanwhile.
fn forget_written(unsaved: &UnsavedChunks, written: &Chunk) {
    let mut unsaved = unsaved.lock();
    if unsaved.get(&written.pos()) == Some(written) {
        unsaved.remove(&written.pos());
    }
}

// =============================================================================
// Read-Write
// =============================================================================

/// Saves and loads one world directory. Used by the authority.
pub struct ReadWriteStorageManager {
    paths: SavePaths,
    writer: Arc<dyn SaveWriter>,
    worker: SaveWorker,
    gate: Arc<SaveGate>,
    unsaved: UnsavedChunks,
    notifications: Vec<StorageNotification>,
    saves_completed: u64,
    shut_down: bool,
}

impl ReadWriteStorageManager {
    /// Opens a world directory with the default format and starts the worker.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the worker thread cannot be started.
    pub fn open(paths: SavePaths) -> Result<Self> {
        Self::with_writer(paths, Arc::new(MessagePackWriter))
    }

    /// Opens a world directory with a custom format.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the worker thread cannot be started.
    pub fn with_writer(paths: SavePaths, writer: Arc<dyn SaveWriter>) -> Result<Self> {
        info!("storage at {}", paths.world_dir().display());
        Ok(Self {
            paths,
            writer,
            worker: SaveWorker::start()?,
            gate: Arc::default(),
            unsaved: Arc::default(),
            notifications: Vec::new(),
            saves_completed: 0,
            shut_down: false,
        })
    }

    /// The world directory layout.
    #[must_use]
    pub fn paths(&self) -> &SavePaths {
        &self.paths
    }

    /// World saves that finished successfully and were collected.
    #[must_use]
    pub fn saves_completed(&self) -> u64 {
        self.saves_completed
    }

    fn ensure_running(&self, action: &str) -> Result<()> {
        if self.shut_down {
            return Err(Error::invalid_transition("shut down", action));
        }
        Ok(())
    }

    fn record(&mut self, outcomes: Vec<JobOutcome>) {
        for outcome in outcomes {
            match (outcome.label, outcome.result) {
                (JobLabel::Save, Ok(report)) => {
                    self.saves_completed += 1;
                    info!(
                        "saved {} entities and {} chunks in {:?}",
                        report.entities, report.chunks, report.elapsed
                    );
                    self.notifications.push(StorageNotification::SaveCompleted {
                        entities: report.entities,
                        chunks: report.chunks,
                        elapsed: report.elapsed,
                    });
                }
                (JobLabel::Save, Err(e)) => {
                    warn!("save failed: {e}");
                    self.notifications.push(StorageNotification::SaveFailed {
                        reason: e.to_string(),
                    });
                }
                (JobLabel::Chunk, Ok(_)) => {}
                (JobLabel::Chunk, Err(e)) => {
                    warn!("chunk write failed: {e}");
                    self.notifications
                        .push(StorageNotification::ChunkWriteFailed {
                            reason: e.to_string(),
                        });
                }
            }
        }
    }
}

impl StorageManager for ReadWriteStorageManager {
    fn update(&mut self) {
        let finished = self.worker.try_completed();
        self.record(finished);
    }

    fn wait_for_completion_of_previous_save_and_start_saving(
        &mut self,
        snapshot: WorldSnapshot,
    ) -> Result<()> {
        self.ensure_running("save")?;
        if self.gate.is_held() {
            debug!("waiting for the previous save");
        }
        let release = self.gate.acquire();
        {
            // Loaders see these until they reach disk.
            let mut unsaved = self.unsaved.lock();
            for chunk in &snapshot.chunks {
                unsaved.insert(chunk.pos(), chunk.clone());
            }
        }

        let writer = Arc::clone(&self.writer);
        let paths = self.paths.clone();
        let unsaved = Arc::clone(&self.unsaved);
        self.worker.submit(
            JobLabel::Save,
            Box::new(move || {
                let _release = release;
                let records = snapshot.records();
                for chunk in &snapshot.chunks {
                    writer.write_chunk(&paths, chunk)?;
                    forget_written(&unsaved, chunk);
                }
                writer.write_entities(&paths, &records)?;
                // The manifest goes last; it marks the save as complete.
                let mut manifest = snapshot.manifest;
                manifest.entity_count = records.len();
                writer.write_manifest(&paths, &manifest)?;
                Ok(SaveReport {
                    entities: records.len(),
                    chunks: snapshot.chunks.len(),
                    elapsed: Duration::ZERO,
                })
            }),
        )?;
        Ok(())
    }

    fn wait_for_completion(&mut self) {
        if self.shut_down {
            return;
        }
        self.gate.wait_idle();
        let finished = self.worker.drain();
        self.record(finished);
    }

    fn finish_saving_and_shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.gate.wait_idle();
        let finished = self.worker.stop();
        self.record(finished);
        self.shut_down = true;
        info!("storage shut down after {} saves", self.saves_completed);
    }

    fn is_saving(&self) -> bool {
        self.gate.is_held()
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn deactivate_chunk(&mut self, chunk: Chunk) -> Result<()> {
        self.ensure_running("deactivate chunk")?;
        let pos = chunk.pos();
        self.unsaved.lock().insert(pos, chunk.clone());

        let writer = Arc::clone(&self.writer);
        let paths = self.paths.clone();
        let unsaved = Arc::clone(&self.unsaved);
        self.worker.submit(
            JobLabel::Chunk,
            Box::new(move || {
                writer.write_chunk(&paths, &chunk)?;
                forget_written(&unsaved, &chunk);
                Ok(SaveReport {
                    chunks: 1,
                    ..SaveReport::default()
                })
            }),
        )?;
        Ok(())
    }

    fn load_chunk(&self, pos: RegionPos) -> Result<Option<Chunk>> {
        if let Some(chunk) = self.unsaved.lock().get(&pos) {
            return Ok(Some(chunk.clone()));
        }
        self.writer.read_chunk(&self.paths, pos)
    }

    fn load_entities(&self) -> Result<Vec<EntityRecord>> {
        self.writer.read_entities(&self.paths)
    }

    fn load_manifest(&self) -> Result<Option<WorldManifest>> {
        self.writer.read_manifest(&self.paths)
    }

    fn take_notifications(&mut self) -> Vec<StorageNotification> {
        std::mem::take(&mut self.notifications)
    }

    fn chunk_sink(&mut self) -> &mut dyn ChunkSink {
        self
    }

    fn chunk_source(&self) -> Option<Box<dyn ChunkSource>> {
        Some(Box::new(FileChunkSource {
            paths: self.paths.clone(),
            writer: Arc::clone(&self.writer),
            unsaved: Arc::clone(&self.unsaved),
        }))
    }
}

impl ChunkSink for ReadWriteStorageManager {
    fn store_chunk(&mut self, chunk: Chunk) -> Result<()> {
        self.deactivate_chunk(chunk)
    }
}

impl Drop for ReadWriteStorageManager {
    fn drop(&mut self) {
        self.finish_saving_and_shutdown();
    }
}

impl fmt::Debug for ReadWriteStorageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadWriteStorageManager")
            .field("paths", &self.paths)
            .field("worker", &self.worker)
            .field("saving", &self.is_saving())
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

/// Reads chunks from a world directory, preferring copies not yet written.
struct FileChunkSource {
    paths: SavePaths,
    writer: Arc<dyn SaveWriter>,
    unsaved: UnsavedChunks,
}

impl ChunkSource for FileChunkSource {
    fn load_chunk(&mut self, pos: RegionPos) -> Result<Option<Chunk>> {
        if let Some(chunk) = self.unsaved.lock().get(&pos) {
            return Ok(Some(chunk.clone()));
        }
        self.writer.read_chunk(&self.paths, pos)
    }
}

// =============================================================================
// Read-Only
// =============================================================================

/// Storage for processes that are not the authority. Saves nothing, loads nothing.
#[derive(Debug, Default)]
pub struct ReadOnlyStorageManager {
    sink: DiscardSink,
    shut_down: bool,
}

impl ReadOnlyStorageManager {
    /// Creates the manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageManager for ReadOnlyStorageManager {
    fn update(&mut self) {}

    fn wait_for_completion_of_previous_save_and_start_saving(
        &mut self,
        _snapshot: WorldSnapshot,
    ) -> Result<()> {
        if self.shut_down {
            return Err(Error::invalid_transition("shut down", "save"));
        }
        debug!("read-only storage ignores save");
        Ok(())
    }

    fn wait_for_completion(&mut self) {}

    fn finish_saving_and_shutdown(&mut self) {
        self.shut_down = true;
    }

    fn is_saving(&self) -> bool {
        false
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn deactivate_chunk(&mut self, _chunk: Chunk) -> Result<()> {
        Ok(())
    }

    fn load_chunk(&self, _pos: RegionPos) -> Result<Option<Chunk>> {
        Ok(None)
    }

    fn load_entities(&self) -> Result<Vec<EntityRecord>> {
        Ok(Vec::new())
    }

    fn load_manifest(&self) -> Result<Option<WorldManifest>> {
        Ok(None)
    }

    fn take_notifications(&mut self) -> Vec<StorageNotification> {
        Vec::new()
    }

    fn chunk_sink(&mut self) -> &mut dyn ChunkSink {
        &mut self.sink
    }

    fn chunk_source(&self) -> Option<Box<dyn ChunkSource>> {
        None
    }
}

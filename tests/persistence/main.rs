//! Integration tests for Layer 4: Persistence
//!
//! Tests for background world saves, reloads, and chunk storage.

mod chunks;
mod saves;

use std::path::PathBuf;
use std::sync::Arc;

use voxelsync_foundation::ComponentKind;
use voxelsync_persistence::{SavePaths, WorldManifest, WorldSnapshot};
use voxelsync_storage::{ComponentDef, ComponentLibrary, EntityManager};

/// A fresh directory under the system temp dir, unique per test and process.
pub fn temp_root(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!(
        "voxelsync_it_persistence_{name}_{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&root);
    root
}

pub fn paths(name: &str) -> SavePaths {
    SavePaths::new(temp_root(name), "world")
}

/// Store with a persisted `health` and a transient `scratch` kind.
pub fn store() -> (EntityManager, ComponentKind) {
    let mut lib = ComponentLibrary::new();
    let health = lib.register(ComponentDef::new("health")).unwrap();
    lib.register(ComponentDef::new("scratch").transient()).unwrap();
    (EntityManager::new(Arc::new(lib)), health)
}

pub fn snapshot(store: &EntityManager, tick: u64) -> WorldSnapshot {
    WorldSnapshot::new(
        WorldManifest::new("world", "Integration", 11).at_tick(tick),
        store.snapshot(),
        Vec::new(),
    )
}

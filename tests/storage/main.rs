//! Integration tests for Layer 1: Storage
//!
//! Tests for the entity store, change journal, and snapshots.

mod entities;
mod journal;

use std::sync::Arc;

use voxelsync_storage::{ComponentDef, ComponentLibrary, EntityManager};

/// Store with `position`, `health`, a local-only `input` and a transient
/// `target` kind, registered in that order.
pub fn store() -> EntityManager {
    let mut lib = ComponentLibrary::new();
    lib.register(ComponentDef::new("position")).unwrap();
    lib.register(ComponentDef::new("health")).unwrap();
    lib.register(ComponentDef::new("input").local_only()).unwrap();
    lib.register(ComponentDef::new("target").transient()).unwrap();
    EntityManager::new(Arc::new(lib))
}

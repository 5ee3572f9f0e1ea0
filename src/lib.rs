//! Voxelsync - replication, persistence and lifecycle core for a voxel engine
//!
//! This crate re-exports all layers of the voxelsync system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 5: voxelsync_runtime      - Session lifecycle, environments, config, server
//! Layer 4: voxelsync_persistence  - Storage manager, background saves, save layout
//! Layer 3: voxelsync_network      - Authority mode, client proxies, coordinator, transports
//! Layer 2: voxelsync_engine       - Event dispatch, region tracking, chunks, systems
//! Layer 1: voxelsync_storage      - Entity/component store, change journal, registries
//! Layer 0: voxelsync_foundation   - Core types (Value, EntityId, Error, spatial math)
//! ```

pub use voxelsync_engine as engine;
pub use voxelsync_foundation as foundation;
pub use voxelsync_network as network;
pub use voxelsync_persistence as persistence;
pub use voxelsync_runtime as runtime;
pub use voxelsync_storage as storage;

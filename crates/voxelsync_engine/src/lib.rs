//! Simulation engine for voxelsync.
//!
//! This crate provides:
//! - [`EventSystem`] - Breadth-first event dispatch with replicable event capture
//! - [`RegionTracker`] - Which clients observe which chunk regions
//! - [`SpatialIndex`] - Which entities stand in which regions
//! - [`ChunkProvider`] - Loads, generates and unloads region chunks
//! - [`ComponentSystemManager`] - Gameplay systems in registration order

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod chunk;
pub mod dispatch;
pub mod event;
pub mod region;
pub mod spatial_index;
pub mod system;

pub use chunk::{
    Chunk, ChunkProvider, ChunkSink, ChunkSource, DiscardSink, RegionChunkProvider,
    WorldGenerator,
};
pub use dispatch::{
    ChangeHandler, DispatchContext, DispatchStats, EventHandler, EventSystem, SubscriptionId,
};
pub use event::{Envelope, Event, Target};
pub use region::{RegionConfig, RegionDelta, RegionTracker, ViewDistance};
pub use spatial_index::{EntityMove, SpatialIndex};
pub use system::{ComponentSystem, ComponentSystemManager, SystemContext};

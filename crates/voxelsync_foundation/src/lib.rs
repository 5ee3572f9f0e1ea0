//! Core types, values, spatial math and errors for voxelsync.
//!
//! This crate provides:
//! - [`EntityId`] - Generational entity handles
//! - [`Value`] - Dynamic component data and event payloads
//! - [`RegionPos`] / [`RegionBox`] - Chunk region coordinates
//! - [`Error`] - Rich error types with context
//! - Shared immutable collections ([`SharedVec`], [`SharedMap`])

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collections;
pub mod entity;
pub mod error;
pub mod kind;
pub mod spatial;
pub mod value;

pub use collections::{SharedMap, SharedVec};
pub use entity::{ClientId, EntityId};
pub use error::{Error, ErrorContext, ErrorKind, Limit, Result};
pub use kind::{ComponentKind, EventKind};
pub use spatial::{RegionBox, RegionPos, RegionSize, Vec3};
pub use value::Value;

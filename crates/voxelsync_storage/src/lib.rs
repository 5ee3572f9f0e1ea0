//! Entity/component store for voxelsync.
//!
//! This crate provides:
//! - [`EntityManager`] - The authoritative store, with a change journal
//! - [`EntityStore`] - Generational entity allocation
//! - [`ComponentStore`] - Persistent component storage
//! - [`ComponentLibrary`] / [`EventLibrary`] - Kind registries built per content set
//! - [`StoreSnapshot`] - O(1) immutable views used by saves

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod component;
pub mod entity;
pub mod journal;
pub mod library;
pub mod manager;
pub mod snapshot;

pub use component::{ComponentStore, KindSet};
pub use entity::EntityStore;
pub use journal::{ChangeJournal, ChangeKind, StoreChange};
pub use library::{
    ComponentDef, ComponentInfo, ComponentLibrary, EntitySystemLibrary, EventDef, EventInfo,
    EventLibrary,
};
pub use manager::EntityManager;
pub use snapshot::{EntityRecord, StoreSnapshot};

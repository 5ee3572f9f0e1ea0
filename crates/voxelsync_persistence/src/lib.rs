//! World persistence for voxelsync.
//!
//! This crate provides:
//! - [`StorageManager`] - The save/shutdown contract, with [`ReadWriteStorageManager`]
//!   for the authority and [`ReadOnlyStorageManager`] for clients
//! - [`SaveWorker`] - The owned background save thread
//! - [`SaveWriter`] - The file format seam, with [`MessagePackWriter`]
//! - [`SavePaths`] - Where a world's files live

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod manager;
pub mod paths;
pub mod snapshot;
pub mod worker;
pub mod writer;

pub use manager::{
    ReadOnlyStorageManager, ReadWriteStorageManager, StorageManager, StorageNotification,
};
pub use paths::SavePaths;
pub use snapshot::{FORMAT_VERSION, WorldManifest, WorldSnapshot};
pub use worker::{JobLabel, JobOutcome, SaveJob, SaveReport, SaveWorker};
pub use writer::{MessagePackWriter, SaveWriter, from_bytes, to_bytes, write_atomic};

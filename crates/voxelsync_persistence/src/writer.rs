//! Save file serialization.
//!
//! [`SaveWriter`] is the format seam; [`MessagePackWriter`] is the format
//! used by default. Every file is written to a temporary sibling first and
//! renamed into place, so a crash mid-save leaves the previous file intact.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind as IoErrorKind, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use voxelsync_engine::Chunk;
use voxelsync_foundation::{Error, RegionPos, Result};
use voxelsync_storage::EntityRecord;

use crate::paths::SavePaths;
use crate::snapshot::WorldManifest;

/// Reads and writes the files of one world.
pub trait SaveWriter: Send + Sync {
    /// Writes world metadata.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error.
    fn write_manifest(&self, paths: &SavePaths, manifest: &WorldManifest) -> Result<()>;

    /// Writes every entity record, replacing the previous set.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error.
    fn write_entities(&self, paths: &SavePaths, records: &[EntityRecord]) -> Result<()>;

    /// Writes one chunk.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error.
    fn write_chunk(&self, paths: &SavePaths, chunk: &Chunk) -> Result<()>;

    /// Reads world metadata. `Ok(None)` if the world was never saved.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error.
    fn read_manifest(&self, paths: &SavePaths) -> Result<Option<WorldManifest>>;

    /// Reads entity records. Empty if none were saved.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error.
    fn read_entities(&self, paths: &SavePaths) -> Result<Vec<EntityRecord>>;

    /// Reads one chunk. `Ok(None)` if it was never saved.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error.
    fn read_chunk(&self, paths: &SavePaths, pos: RegionPos) -> Result<Option<Chunk>>;
}

/// Writes `MessagePack` files with named fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessagePackWriter;

impl SaveWriter for MessagePackWriter {
    fn write_manifest(&self, paths: &SavePaths, manifest: &WorldManifest) -> Result<()> {
        write_atomic(&paths.manifest(), &to_bytes(manifest)?)
    }

    fn write_entities(&self, paths: &SavePaths, records: &[EntityRecord]) -> Result<()> {
        write_atomic(&paths.entities(), &to_bytes(&records)?)
    }

    fn write_chunk(&self, paths: &SavePaths, chunk: &Chunk) -> Result<()> {
        write_atomic(&paths.chunk(chunk.pos()), &to_bytes(chunk)?)
    }

    fn read_manifest(&self, paths: &SavePaths) -> Result<Option<WorldManifest>> {
        read_optional(&paths.manifest())?
            .map(|bytes| from_bytes(&bytes))
            .transpose()
    }

    fn read_entities(&self, paths: &SavePaths) -> Result<Vec<EntityRecord>> {
        Ok(read_optional(&paths.entities())?
            .map(|bytes| from_bytes(&bytes))
            .transpose()?
            .unwrap_or_default())
    }

    fn read_chunk(&self, paths: &SavePaths, pos: RegionPos) -> Result<Option<Chunk>> {
        let Some(bytes) = read_optional(&paths.chunk(pos))? else {
            return Ok(None);
        };
        let chunk: Chunk = from_bytes(&bytes)?;
        if chunk.pos() != pos {
            return Err(Error::serialization(format!(
                "chunk file for {pos:?} holds {:?}",
                chunk.pos()
            )));
        }
        Ok(Some(chunk))
    }
}

/// Serializes a value with named fields.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(Error::serialization)
}

/// Deserializes a value.
///
/// # Errors
///
/// Returns an error if the bytes do not hold a `T`.
pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(Error::serialization)
}

/// Writes `bytes` to a temporary sibling of `path`, then renames it into place.
///
/// # Errors
///
/// Returns an error if the directory, file or rename fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_error("create directory", dir, &e))?;
    }
    let temp = path.with_extension("tmp");
    let file = File::create(&temp).map_err(|e| io_error("create", &temp, &e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(bytes)
        .and_then(|()| writer.flush())
        .map_err(|e| io_error("write", &temp, &e))?;
    drop(writer);
    fs::rename(&temp, path).map_err(|e| io_error("rename", path, &e))
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error("read", path, &e)),
    }
}

fn io_error(action: &str, path: &Path, err: &std::io::Error) -> Error {
    Error::io(format!("failed to {action} '{}': {err}", path.display()))
}

//! On-disk layout of a saved world.
//!
//! ```text
//! <save_root>/<world_id>/manifest.msgpack
//! <save_root>/<world_id>/entities.msgpack
//! <save_root>/<world_id>/chunks/<x>_<y>_<z>.chunk
//! ```

use std::path::{Path, PathBuf};

use voxelsync_foundation::RegionPos;

/// Paths of one world's save directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavePaths {
    world_dir: PathBuf,
}

impl SavePaths {
    /// Paths for `world_id` under `save_root`.
    ///
    /// Path separators in the id are replaced so a world can never escape the root.
    #[must_use]
    pub fn new(save_root: impl AsRef<Path>, world_id: &str) -> Self {
        let safe: String = world_id
            .chars()
            .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
            .collect();
        let safe = if safe.is_empty() || safe == "." || safe == ".." {
            "world".to_string()
        } else {
            safe
        };
        Self {
            world_dir: save_root.as_ref().join(safe),
        }
    }

    /// The world directory.
    #[must_use]
    pub fn world_dir(&self) -> &Path {
        &self.world_dir
    }

    /// World metadata.
    #[must_use]
    pub fn manifest(&self) -> PathBuf {
        self.world_dir.join("manifest.msgpack")
    }

    /// Entity records.
    #[must_use]
    pub fn entities(&self) -> PathBuf {
        self.world_dir.join("entities.msgpack")
    }

    /// Directory holding one file per chunk.
    #[must_use]
    pub fn chunk_dir(&self) -> PathBuf {
        self.world_dir.join("chunks")
    }

    /// File of the chunk at `pos`.
    #[must_use]
    pub fn chunk(&self, pos: RegionPos) -> PathBuf {
        self.chunk_dir()
            .join(format!("{}_{}_{}.chunk", pos.x, pos.y, pos.z))
    }
}

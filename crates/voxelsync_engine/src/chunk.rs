//! Chunk storage and the region-driven chunk provider.
//!
//! A chunk holds the blocks of exactly one region. The provider loads or
//! generates a chunk when its region becomes observed and hands dirty chunks
//! to a [`ChunkSink`] when the region is evicted or the provider is disposed.

use std::collections::HashMap;

use log::{debug, trace};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use voxelsync_foundation::{Error, RegionPos, RegionSize, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Block id of empty space.
pub const AIR: u16 = 0;
/// Block id of stone.
pub const STONE: u16 = 1;
/// Block id of dirt.
pub const DIRT: u16 = 2;
/// Block id of grass.
pub const GRASS: u16 = 3;

/// The blocks of one region.
///
/// Blocks are laid out x-fastest, then z, then y.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Chunk {
    pos: RegionPos,
    size: RegionSize,
    blocks: Vec<u16>,
    #[cfg_attr(feature = "serde", serde(skip))]
    dirty: bool,
}

impl Chunk {
    /// Creates a chunk filled with air.
    #[must_use]
    pub fn new(pos: RegionPos, size: RegionSize) -> Self {
        Self {
            pos,
            size,
            blocks: vec![AIR; size.volume()],
            dirty: false,
        }
    }

    /// Creates a chunk from raw blocks.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the block count does not match the size.
    pub fn from_blocks(pos: RegionPos, size: RegionSize, blocks: Vec<u16>) -> Result<Self> {
        if blocks.len() != size.volume() {
            return Err(Error::serialization(format!(
                "chunk {pos:?} has {} blocks, expected {}",
                blocks.len(),
                size.volume()
            )));
        }
        Ok(Self {
            pos,
            size,
            blocks,
            dirty: false,
        })
    }

    /// Region of this chunk.
    #[must_use]
    pub fn pos(&self) -> RegionPos {
        self.pos
    }

    /// Dimensions in blocks.
    #[must_use]
    pub fn size(&self) -> RegionSize {
        self.size
    }

    /// Raw blocks.
    #[must_use]
    pub fn blocks(&self) -> &[u16] {
        &self.blocks
    }

    /// Block at local coordinates, or `None` if out of range.
    #[must_use]
    pub fn get(&self, x: u32, y: u32, z: u32) -> Option<u16> {
        self.offset(x, y, z).map(|i| self.blocks[i])
    }

    /// Sets a block and marks the chunk dirty.
    ///
    /// Returns false if the coordinates are out of range.
    pub fn set(&mut self, x: u32, y: u32, z: u32, block: u16) -> bool {
        let Some(i) = self.offset(x, y, z) else {
            return false;
        };
        if self.blocks[i] != block {
            self.blocks[i] = block;
            self.dirty = true;
        }
        true
    }

    /// Returns true if the chunk changed since it was loaded or saved.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn offset(&self, x: u32, y: u32, z: u32) -> Option<usize> {
        let s = self.size;
        (x < s.x && y < s.y && z < s.z)
            .then(|| x as usize + z as usize * s.x as usize + y as usize * s.x as usize * s.z as usize)
    }
}

/// Somewhere chunks can be read back from.
pub trait ChunkSource {
    /// Loads a previously stored chunk, or `Ok(None)` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data exists but cannot be read.
    fn load_chunk(&mut self, pos: RegionPos) -> Result<Option<Chunk>>;
}

/// Somewhere deactivated chunks are handed to for saving.
pub trait ChunkSink {
    /// Takes ownership of a chunk leaving memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink cannot accept the chunk.
    fn store_chunk(&mut self, chunk: Chunk) -> Result<()>;
}

/// A sink that drops everything. Used when storage is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl ChunkSink for DiscardSink {
    fn store_chunk(&mut self, _chunk: Chunk) -> Result<()> {
        Ok(())
    }
}

/// Keeps the chunks of observed regions in memory.
pub trait ChunkProvider {
    /// A loaded chunk.
    fn chunk(&self, pos: RegionPos) -> Option<&Chunk>;

    /// A loaded chunk, mutably.
    fn chunk_mut(&mut self, pos: RegionPos) -> Option<&mut Chunk>;

    /// Makes sure the chunk of a newly observed region is loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if stored chunk data cannot be read.
    fn on_region_entered(&mut self, pos: RegionPos) -> Result<()>;

    /// Unloads the chunk of an evicted region, handing it to `sink` if dirty.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink rejects the chunk.
    fn on_region_evicted(&mut self, pos: RegionPos, sink: &mut dyn ChunkSink) -> Result<()>;

    /// Copies every dirty chunk and marks the originals clean.
    fn take_dirty_chunks(&mut self) -> Vec<Chunk>;

    /// Number of loaded chunks.
    fn loaded_count(&self) -> usize;

    /// Unloads everything, handing dirty chunks to `sink`.
    ///
    /// # Errors
    ///
    /// Returns the first sink error; remaining chunks are still unloaded.
    fn dispose(&mut self, sink: &mut dyn ChunkSink) -> Result<()>;
}

/// Deterministic terrain generator.
///
/// The same seed and region always produce the same chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldGenerator {
    seed: u64,
    surface: i32,
}

impl WorldGenerator {
    /// Surface height used when none is given.
    pub const DEFAULT_SURFACE: i32 = 32;

    /// Creates a generator.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            surface: Self::DEFAULT_SURFACE,
        }
    }

    /// Sets the base surface height in world blocks.
    #[must_use]
    pub fn with_surface(mut self, surface: i32) -> Self {
        self.surface = surface;
        self
    }

    /// The world seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generates the chunk of a region.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn generate(&self, pos: RegionPos, size: RegionSize) -> Chunk {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ region_hash(pos));
        let mut chunk = Chunk::new(pos, size);
        let base_y = i64::from(pos.y) * i64::from(size.y);

        for z in 0..size.z {
            for x in 0..size.x {
                let height = i64::from(self.surface) + rng.gen_range(0..4);
                for y in 0..size.y {
                    let world_y = base_y + i64::from(y);
                    let block = if world_y < height - 3 {
                        STONE
                    } else if world_y < height {
                        DIRT
                    } else if world_y == height {
                        GRASS
                    } else {
                        AIR
                    };
                    if block != AIR {
                        chunk.set(x, y, z, block);
                    }
                }
            }
        }
        chunk.mark_clean();
        chunk
    }
}

fn region_hash(pos: RegionPos) -> u64 {
    #[allow(clippy::cast_sign_loss)]
    let [x, y, z] = [pos.x as u32, pos.y as u32, pos.z as u32].map(u64::from);
    x.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ y.wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ z.wrapping_mul(0x1656_67B1_9E37_79F9)
}

/// Chunk provider backed by a generator and an optional stored source.
pub struct RegionChunkProvider {
    size: RegionSize,
    generator: WorldGenerator,
    source: Option<Box<dyn ChunkSource>>,
    loaded: HashMap<RegionPos, Chunk>,
}

impl RegionChunkProvider {
    /// Creates a provider that only generates.
    #[must_use]
    pub fn new(size: RegionSize, generator: WorldGenerator) -> Self {
        Self {
            size,
            generator,
            source: None,
            loaded: HashMap::new(),
        }
    }

    /// Reads stored chunks from `source` before falling back to generation.
    #[must_use]
    pub fn with_source(mut self, source: Box<dyn ChunkSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Positions of loaded chunks.
    pub fn loaded_positions(&self) -> impl Iterator<Item = RegionPos> + '_ {
        self.loaded.keys().copied()
    }
}

impl std::fmt::Debug for RegionChunkProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionChunkProvider")
            .field("size", &self.size)
            .field("generator", &self.generator)
            .field("has_source", &self.source.is_some())
            .field("loaded", &self.loaded.len())
            .finish()
    }
}

impl ChunkProvider for RegionChunkProvider {
    fn chunk(&self, pos: RegionPos) -> Option<&Chunk> {
        self.loaded.get(&pos)
    }

    fn chunk_mut(&mut self, pos: RegionPos) -> Option<&mut Chunk> {
        self.loaded.get_mut(&pos)
    }

    fn on_region_entered(&mut self, pos: RegionPos) -> Result<()> {
        if self.loaded.contains_key(&pos) {
            return Ok(());
        }
        let stored = match self.source.as_mut() {
            Some(source) => source.load_chunk(pos)?,
            None => None,
        };
        let chunk = match stored {
            Some(chunk) => {
                trace!("loaded chunk {pos:?}");
                chunk
            }
            None => {
                trace!("generated chunk {pos:?}");
                self.generator.generate(pos, self.size)
            }
        };
        self.loaded.insert(pos, chunk);
        Ok(())
    }

    fn on_region_evicted(&mut self, pos: RegionPos, sink: &mut dyn ChunkSink) -> Result<()> {
        match self.loaded.remove(&pos) {
            Some(chunk) if chunk.is_dirty() => sink.store_chunk(chunk),
            _ => Ok(()),
        }
    }

    fn take_dirty_chunks(&mut self) -> Vec<Chunk> {
        let mut dirty = Vec::new();
        for chunk in self.loaded.values_mut().filter(|c| c.is_dirty()) {
            dirty.push(chunk.clone());
            chunk.mark_clean();
        }
        dirty
    }

    fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    fn dispose(&mut self, sink: &mut dyn ChunkSink) -> Result<()> {
        let mut first_error = None;
        let mut stored = 0usize;
        for (_, chunk) in self.loaded.drain() {
            if !chunk.is_dirty() {
                continue;
            }
            match sink.store_chunk(chunk) {
                Ok(()) => stored += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        debug!("chunk provider disposed, {stored} dirty chunks handed off");
        first_error.map_or(Ok(()), Err)
    }
}

//! Integration tests for chunk loading
//!
//! Tests generation, stored-chunk lookup, and hand-off of dirty chunks.

use std::collections::HashMap;

use voxelsync_engine::{
    Chunk, ChunkProvider, ChunkSink, ChunkSource, DiscardSink, RegionChunkProvider,
    WorldGenerator,
};
use voxelsync_foundation::{RegionPos, RegionSize, Result};

const SIZE: RegionSize = RegionSize::new(8, 8, 8);

#[derive(Default)]
struct MapSource(HashMap<RegionPos, Chunk>);

impl ChunkSource for MapSource {
    fn load_chunk(&mut self, pos: RegionPos) -> Result<Option<Chunk>> {
        Ok(self.0.get(&pos).cloned())
    }
}

#[derive(Default)]
struct Collect(Vec<RegionPos>);

impl ChunkSink for Collect {
    fn store_chunk(&mut self, chunk: Chunk) -> Result<()> {
        self.0.push(chunk.pos());
        Ok(())
    }
}

#[test]
fn generation_is_deterministic_per_seed() {
    let pos = RegionPos::new(3, 4, -2);
    let a = WorldGenerator::new(7).with_surface(36).generate(pos, SIZE);
    let b = WorldGenerator::new(7).with_surface(36).generate(pos, SIZE);
    let c = WorldGenerator::new(8).with_surface(36).generate(pos, SIZE);
    assert_eq!(a, b);
    assert_ne!(a.blocks(), c.blocks());
    assert!(!a.is_dirty());
}

#[test]
fn stored_chunks_win_over_generation() {
    let pos = RegionPos::new(0, 0, 0);
    let mut stored = Chunk::new(pos, SIZE);
    stored.set(1, 1, 1, 42);
    stored.mark_clean();
    let mut source = MapSource::default();
    source.0.insert(pos, stored.clone());

    let mut provider =
        RegionChunkProvider::new(SIZE, WorldGenerator::new(1)).with_source(Box::new(source));
    provider.on_region_entered(pos).unwrap();
    provider.on_region_entered(RegionPos::new(1, 0, 0)).unwrap();

    assert_eq!(provider.chunk(pos), Some(&stored));
    assert_eq!(provider.loaded_count(), 2);
}

#[test]
fn only_dirty_chunks_reach_the_sink() {
    let mut provider = RegionChunkProvider::new(SIZE, WorldGenerator::new(1));
    let clean = RegionPos::new(0, 0, 0);
    let dirty = RegionPos::new(0, 0, 1);
    provider.on_region_entered(clean).unwrap();
    provider.on_region_entered(dirty).unwrap();
    assert!(provider.chunk_mut(dirty).unwrap().set(0, 0, 0, 9));

    let mut sink = Collect::default();
    provider.on_region_evicted(clean, &mut sink).unwrap();
    provider.on_region_evicted(dirty, &mut sink).unwrap();

    assert_eq!(sink.0, vec![dirty]);
    assert_eq!(provider.loaded_count(), 0);
}

#[test]
fn take_dirty_chunks_marks_them_clean() {
    let mut provider = RegionChunkProvider::new(SIZE, WorldGenerator::new(1));
    let pos = RegionPos::new(0, 0, 0);
    provider.on_region_entered(pos).unwrap();
    provider.chunk_mut(pos).unwrap().set(2, 2, 2, 5);

    assert_eq!(provider.take_dirty_chunks().len(), 1);
    assert!(provider.take_dirty_chunks().is_empty());

    let mut sink = Collect::default();
    provider.dispose(&mut sink).unwrap();
    assert!(sink.0.is_empty());
}

#[test]
fn dispose_empties_the_provider() {
    let mut provider = RegionChunkProvider::new(SIZE, WorldGenerator::new(1));
    for x in 0..4 {
        provider.on_region_entered(RegionPos::new(x, 0, 0)).unwrap();
    }
    provider.dispose(&mut DiscardSink).unwrap();
    assert_eq!(provider.loaded_count(), 0);
}

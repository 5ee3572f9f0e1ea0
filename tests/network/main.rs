//! Integration tests for Layer 3: Network
//!
//! Tests for joining, visibility-driven replication, and the TCP transport.

mod replication;
mod tcp;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use voxelsync_engine::{
    Chunk, ChunkProvider, ChunkSink, DiscardSink, EventSystem, ViewDistance,
};
use voxelsync_foundation::{ComponentKind, RegionPos, Result};
use voxelsync_network::{
    ClientConnection, Color, NetworkConfig, NetworkCoordinator, ServerInfo,
};
use voxelsync_storage::{ComponentDef, ComponentLibrary, EntityManager, EventDef, EventLibrary};

// =============================================================================
// Fixtures
// =============================================================================

/// Chunk provider that only counts region traffic.
#[derive(Default)]
pub struct NoChunks {
    pub entered: usize,
    pub evicted: usize,
}

impl ChunkProvider for NoChunks {
    fn chunk(&self, _pos: RegionPos) -> Option<&Chunk> {
        None
    }

    fn chunk_mut(&mut self, _pos: RegionPos) -> Option<&mut Chunk> {
        None
    }

    fn on_region_entered(&mut self, _pos: RegionPos) -> Result<()> {
        self.entered += 1;
        Ok(())
    }

    fn on_region_evicted(&mut self, _pos: RegionPos, _sink: &mut dyn ChunkSink) -> Result<()> {
        self.evicted += 1;
        Ok(())
    }

    fn take_dirty_chunks(&mut self) -> Vec<Chunk> {
        Vec::new()
    }

    fn loaded_count(&self) -> usize {
        self.entered - self.evicted
    }

    fn dispose(&mut self, _sink: &mut dyn ChunkSink) -> Result<()> {
        Ok(())
    }
}

/// One side's game state.
pub struct World {
    pub store: EntityManager,
    pub events: EventSystem,
    pub chunks: NoChunks,
}

impl World {
    pub fn new() -> Self {
        let mut components = ComponentLibrary::new();
        components.register(ComponentDef::new("position")).unwrap();
        components.register(ComponentDef::new("health")).unwrap();
        components
            .register(ComponentDef::new("input").local_only())
            .unwrap();
        let mut events = EventLibrary::new();
        events
            .register(EventDef::new("chat").replicable().server_event())
            .unwrap();
        events.register(EventDef::new("explosion").replicable()).unwrap();
        events.register(EventDef::new("footstep")).unwrap();
        Self {
            store: EntityManager::new(Arc::new(components)),
            events: EventSystem::new(Arc::new(events)),
            chunks: NoChunks::default(),
        }
    }

    pub fn kind(&self, name: &str) -> ComponentKind {
        self.store.library().resolve(name).unwrap()
    }

    pub fn config(&self) -> NetworkConfig {
        NetworkConfig::new(self.kind("position")).with_server_info(ServerInfo {
            name: "it".into(),
            motd: "welcome".into(),
            world_title: "plains".into(),
        })
    }

    pub fn receive(&mut self, net: &mut NetworkCoordinator) {
        net.receive(&mut self.store, &mut self.events, &mut self.chunks)
            .unwrap();
    }

    pub fn flush(&mut self, net: &mut NetworkCoordinator) {
        net.flush(&self.store, &mut self.events, &mut self.chunks, &mut DiscardSink)
            .unwrap();
    }

    /// Runs dispatch and one replication flush.
    pub fn tick(&mut self, net: &mut NetworkCoordinator) {
        self.receive(net);
        self.events.process(&mut self.store).unwrap();
        self.flush(net);
    }
}

/// Joins on a helper thread while the authority keeps receiving.
pub fn join(
    server: &mut NetworkCoordinator,
    world: &mut World,
    connection: ClientConnection,
    name: &'static str,
    config: NetworkConfig,
) -> NetworkCoordinator {
    join_seeing(server, world, connection, name, config, ViewDistance::NEAR)
}

/// [`join`] asking for a particular view distance.
pub fn join_seeing(
    server: &mut NetworkCoordinator,
    world: &mut World,
    connection: ClientConnection,
    name: &'static str,
    config: NetworkConfig,
    distance: ViewDistance,
) -> NetworkCoordinator {
    let handle = thread::spawn(move || {
        NetworkCoordinator::join(config, connection, name, Color::rgb(10, 200, 10), distance)
    });
    for _ in 0..2000 {
        world.receive(server);
        if handle.is_finished() {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    handle.join().unwrap().unwrap()
}

/// Receives on `net` until `done` holds or about two seconds pass.
pub fn receive_until(
    net: &mut NetworkCoordinator,
    world: &mut World,
    mut done: impl FnMut(&NetworkCoordinator, &World) -> bool,
) -> bool {
    for _ in 0..1000 {
        world.receive(net);
        if done(net, world) {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

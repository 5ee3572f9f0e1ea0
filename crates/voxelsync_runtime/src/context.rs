//! Everything an in-game session is built from.
//!
//! Collaborators are passed in explicitly. Headless defaults are chosen here,
//! at composition time; callers replace them with `with_*` methods.

use crossbeam_channel::Receiver;
use log::{info, warn};
use voxelsync_engine::{
    ChunkProvider, ComponentSystem, ComponentSystemManager, EventSystem, RegionChunkProvider,
    WorldGenerator,
};
use voxelsync_foundation::{Error, Result};
use voxelsync_network::{NetworkCoordinator, NetworkMode};
use voxelsync_persistence::{
    ReadOnlyStorageManager, ReadWriteStorageManager, StorageManager, WorldManifest,
};
use voxelsync_storage::EntityManager;

use crate::collaborators::{
    AudioManager, CameraTargetSystem, HeadlessRenderer, HeadlessUi, InputSystem, NullAudio,
    NullCameraTarget, NullInput, NullPhysics, PhysicsEngine, UiManager, WorldRenderer,
};
use crate::config::{ConfigChange, EngineConfig};
use crate::console::MessageLog;
use crate::module::{EnvironmentSwitchHandler, ModuleManager, NullSwitchHandler};

/// Picks the storage manager for a process: read-write for an authority with
/// storage enabled, read-only otherwise.
///
/// # Errors
///
/// Returns `Io` if the save worker cannot be started.
pub fn open_storage(config: &EngineConfig, mode: NetworkMode) -> Result<Box<dyn StorageManager>> {
    if mode.is_authority() && config.storage.enabled {
        Ok(Box::new(ReadWriteStorageManager::open(config.save_paths())?))
    } else {
        info!("storage is read-only ({mode} mode)");
        Ok(Box::new(ReadOnlyStorageManager::new()))
    }
}

/// The collaborators of an in-game session.
#[allow(clippy::struct_field_names)]
pub struct IngameContext {
    /// World identity and current tick.
    pub manifest: WorldManifest,
    /// The entity store.
    pub store: EntityManager,
    /// Event dispatch.
    pub events: EventSystem,
    /// Gameplay systems.
    pub systems: ComponentSystemManager,
    /// Replication.
    pub network: NetworkCoordinator,
    /// Persistence.
    pub storage: Box<dyn StorageManager>,
    /// Chunks of observed regions.
    pub chunks: Box<dyn ChunkProvider>,
    /// World rendering.
    pub renderer: Box<dyn WorldRenderer>,
    /// Audio playback.
    pub audio: Box<dyn AudioManager>,
    /// Physics.
    pub physics: Box<dyn PhysicsEngine>,
    /// Presentation layer.
    pub ui: Box<dyn UiManager>,
    /// Input handling.
    pub input: Box<dyn InputSystem>,
    /// Camera follow.
    pub camera: Box<dyn CameraTargetSystem>,
    /// Content environments.
    pub modules: Box<dyn ModuleManager>,
    /// Told when teardown unloads the world and leaves the empty environment active.
    pub switch_handler: Box<dyn EnvironmentSwitchHandler>,
    /// In-session notifications.
    pub console: MessageLog,
    /// Configuration at startup.
    pub config: EngineConfig,
    /// Live configuration changes.
    pub config_changes: Option<Receiver<ConfigChange>>,
}

impl IngameContext {
    /// A headless session over the primary environment of `modules`.
    ///
    /// # Errors
    ///
    /// Returns `ModuleResolution` if `modules` has no primary environment.
    pub fn headless(
        config: EngineConfig,
        modules: Box<dyn ModuleManager>,
        network: NetworkCoordinator,
        storage: Box<dyn StorageManager>,
    ) -> Result<Self> {
        let environment = modules
            .environment()
            .ok_or_else(|| Error::module_resolution("no primary environment loaded"))?;

        let regions = config.region_config();
        let mut chunks = RegionChunkProvider::new(regions.size, WorldGenerator::new(config.world.seed));
        if let Some(source) = storage.chunk_source() {
            chunks = chunks.with_source(source);
        }

        Ok(Self {
            manifest: WorldManifest::new(
                config.world.world_id.clone(),
                config.world.title.clone(),
                config.world.seed,
            ),
            store: EntityManager::new(environment.components().clone()),
            events: EventSystem::new(environment.events().clone())
                .with_max_passes(config.events.max_passes),
            systems: ComponentSystemManager::new(),
            network,
            storage,
            chunks: Box::new(chunks),
            renderer: Box::new(HeadlessRenderer),
            audio: Box::new(NullAudio),
            physics: Box::new(NullPhysics),
            ui: Box::new(HeadlessUi::new()),
            input: Box::new(NullInput),
            camera: Box::new(NullCameraTarget),
            modules,
            switch_handler: Box::new(NullSwitchHandler),
            console: MessageLog::default(),
            config,
            config_changes: None,
        })
    }

    /// Loads the stored world into the store. Does nothing if nothing is stored.
    /// Returns the number of entities loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data cannot be read or names unknown kinds.
    pub fn restore_world(&mut self) -> Result<usize> {
        let Some(stored) = self.storage.load_manifest()? else {
            return Ok(0);
        };
        if stored.seed != self.manifest.seed {
            warn!(
                "stored seed {} differs from configured seed {}",
                stored.seed, self.manifest.seed
            );
        }
        let records = self.storage.load_entities()?;
        self.store.restore(&records)?;
        self.manifest.tick = stored.tick;
        info!(
            "restored {} entities of '{}' at tick {}",
            records.len(),
            stored.title,
            stored.tick
        );
        Ok(records.len())
    }

    /// Adds a gameplay system.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` once systems have shut down.
    pub fn add_system(&mut self, system: Box<dyn ComponentSystem>) -> Result<()> {
        self.systems.register(system)
    }

    /// Replaces the chunk provider.
    #[must_use]
    pub fn with_chunks(mut self, chunks: Box<dyn ChunkProvider>) -> Self {
        self.chunks = chunks;
        self
    }

    /// Replaces the renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Box<dyn WorldRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Replaces audio.
    #[must_use]
    pub fn with_audio(mut self, audio: Box<dyn AudioManager>) -> Self {
        self.audio = audio;
        self
    }

    /// Replaces physics.
    #[must_use]
    pub fn with_physics(mut self, physics: Box<dyn PhysicsEngine>) -> Self {
        self.physics = physics;
        self
    }

    /// Replaces the presentation layer.
    #[must_use]
    pub fn with_ui(mut self, ui: Box<dyn UiManager>) -> Self {
        self.ui = ui;
        self
    }

    /// Replaces input handling.
    #[must_use]
    pub fn with_input(mut self, input: Box<dyn InputSystem>) -> Self {
        self.input = input;
        self
    }

    /// Replaces camera follow.
    #[must_use]
    pub fn with_camera(mut self, camera: Box<dyn CameraTargetSystem>) -> Self {
        self.camera = camera;
        self
    }

    /// Replaces the environment switch handler.
    #[must_use]
    pub fn with_switch_handler(mut self, handler: Box<dyn EnvironmentSwitchHandler>) -> Self {
        self.switch_handler = handler;
        self
    }

    /// Subscribes to live configuration changes.
    #[must_use]
    pub fn with_config_changes(mut self, changes: Receiver<ConfigChange>) -> Self {
        self.config_changes = Some(changes);
        self
    }
}

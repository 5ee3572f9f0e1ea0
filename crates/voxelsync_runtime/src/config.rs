//! Engine configuration.
//!
//! Values are layered: built-in defaults, then an optional file, then
//! `VOXELSYNC_*` environment variables (`VOXELSYNC_WORLD__SEED=7`). Settings
//! that may change while a session runs are published as [`ConfigChange`]
//! notifications through a [`ConfigWatcher`].

use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::debug;
use serde::{Deserialize, Serialize};
use voxelsync_engine::RegionConfig;
use voxelsync_foundation::{ComponentKind, Error, RegionSize, Result};
use voxelsync_network::{NetworkConfig, ServerInfo};
use voxelsync_persistence::SavePaths;

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "VOXELSYNC";

/// World identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    /// Human-readable title.
    pub title: String,
    /// Directory name under the save root.
    pub world_id: String,
    /// Terrain seed.
    pub seed: u64,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            title: "New World".to_string(),
            world_id: "world".to_string(),
            seed: 0,
        }
    }
}

/// Persistence settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// False selects the read-only storage manager.
    pub enabled: bool,
    /// Directory holding one subdirectory per world.
    pub save_root: PathBuf,
    /// Ticks between autosaves; 0 disables autosave.
    pub autosave_interval: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            save_root: PathBuf::from("saves"),
            autosave_interval: 6000,
        }
    }
}

/// Replication settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Ticks between replication flushes.
    pub net_tick_interval: u32,
    /// Advertised server name.
    pub server_name: String,
    /// Message shown once to joining clients.
    pub motd: String,
    /// Inbound messages applied per client per tick.
    pub max_inbound_per_tick: usize,
    /// Largest view radius granted to any player, in regions.
    pub max_view_distance: u32,
    /// Listen address of the dedicated server.
    pub bind: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            net_tick_interval: 1,
            server_name: "voxelsync".to_string(),
            motd: String::new(),
            max_inbound_per_tick: 256,
            max_view_distance: 32,
            bind: "0.0.0.0:25777".to_string(),
        }
    }
}

/// Region geometry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSettings {
    /// Region width in blocks.
    pub size_x: u32,
    /// Region height in blocks.
    pub size_y: u32,
    /// Region depth in blocks.
    pub size_z: u32,
    /// Vertical view radius in regions.
    pub vertical_radius: u32,
}

impl Default for RegionSettings {
    fn default() -> Self {
        let RegionConfig {
            size,
            vertical_radius,
        } = RegionConfig::default();
        Self {
            size_x: size.x,
            size_y: size.y,
            size_z: size.z,
            vertical_radius,
        }
    }
}

/// Event dispatch settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Dispatch passes allowed per tick before giving up.
    pub max_passes: u32,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            max_passes: voxelsync_engine::EventSystem::DEFAULT_MAX_PASSES,
        }
    }
}

/// Presentation settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationSettings {
    /// Hides the HUD.
    pub hud_hidden: bool,
}

/// Complete engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// World identity.
    pub world: WorldSettings,
    /// Persistence.
    pub storage: StorageSettings,
    /// Replication.
    pub network: NetworkSettings,
    /// Region geometry.
    pub regions: RegionSettings,
    /// Event dispatch.
    pub events: EventSettings,
    /// Presentation.
    pub presentation: PresentationSettings,
}

impl EngineConfig {
    /// Loads defaults, then `path` if given, then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file is missing or malformed, or a value has
    /// the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&Self::default()).map_err(Error::config)?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            debug!("loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(Error::config)
    }

    /// Builder method to set the world.
    #[must_use]
    pub fn with_world(mut self, world_id: impl Into<String>, title: impl Into<String>) -> Self {
        self.world.world_id = world_id.into();
        self.world.title = title.into();
        self
    }

    /// Builder method to set the seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.world.seed = seed;
        self
    }

    /// Builder method to set the save root.
    #[must_use]
    pub fn with_save_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage.save_root = root.into();
        self
    }

    /// Builder method to enable or disable persistence.
    #[must_use]
    pub fn with_storage_enabled(mut self, enabled: bool) -> Self {
        self.storage.enabled = enabled;
        self
    }

    /// Builder method to set the autosave interval in ticks.
    #[must_use]
    pub fn with_autosave_interval(mut self, ticks: u64) -> Self {
        self.storage.autosave_interval = ticks;
        self
    }

    /// Builder method to set the message of the day.
    #[must_use]
    pub fn with_motd(mut self, motd: impl Into<String>) -> Self {
        self.network.motd = motd.into();
        self
    }

    /// Builder method to set the listen address.
    #[must_use]
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.network.bind = bind.into();
        self
    }

    /// Builder method to set the net tick interval.
    #[must_use]
    pub fn with_net_tick_interval(mut self, ticks: u32) -> Self {
        self.network.net_tick_interval = ticks;
        self
    }

    /// Builder method to hide the HUD.
    #[must_use]
    pub fn with_hud_hidden(mut self, hidden: bool) -> Self {
        self.presentation.hud_hidden = hidden;
        self
    }

    /// Region geometry for the tracker and chunk provider.
    #[must_use]
    pub fn region_config(&self) -> RegionConfig {
        let r = &self.regions;
        RegionConfig {
            size: RegionSize::new(r.size_x.max(1), r.size_y.max(1), r.size_z.max(1)),
            vertical_radius: r.vertical_radius,
        }
    }

    /// What the server advertises to joining clients.
    #[must_use]
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: self.network.server_name.clone(),
            motd: self.network.motd.clone(),
            world_title: self.world.title.clone(),
        }
    }

    /// Coordinator settings, tracking entities through `position`.
    #[must_use]
    pub fn network_config(&self, position: ComponentKind) -> NetworkConfig {
        NetworkConfig::new(position)
            .with_net_tick_interval(self.network.net_tick_interval.max(1))
            .with_max_inbound_per_tick(self.network.max_inbound_per_tick)
            .with_max_view_distance(self.network.max_view_distance)
            .with_server_info(self.server_info())
            .with_regions(self.region_config())
    }

    /// Save layout of the configured world.
    #[must_use]
    pub fn save_paths(&self) -> SavePaths {
        SavePaths::new(&self.storage.save_root, &self.world.world_id)
    }
}

// =============================================================================
// Live changes
// =============================================================================

/// A setting changed while the session runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigChange {
    /// HUD visibility.
    HudHidden(bool),
    /// Ticks between autosaves.
    AutosaveInterval(u64),
}

/// Owns the live configuration and publishes changes to subscribers.
#[derive(Debug)]
pub struct ConfigWatcher {
    current: EngineConfig,
    subscribers: Vec<Sender<ConfigChange>>,
}

impl ConfigWatcher {
    /// Starts from `config`.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            current: config,
            subscribers: Vec::new(),
        }
    }

    /// The current configuration.
    #[must_use]
    pub fn current(&self) -> &EngineConfig {
        &self.current
    }

    /// A receiver for every later change.
    pub fn subscribe(&mut self) -> Receiver<ConfigChange> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Shows or hides the HUD.
    pub fn set_hud_hidden(&mut self, hidden: bool) {
        let mut next = self.current.clone();
        next.presentation.hud_hidden = hidden;
        self.apply(next);
    }

    /// Changes the autosave interval.
    pub fn set_autosave_interval(&mut self, ticks: u64) {
        let mut next = self.current.clone();
        next.storage.autosave_interval = ticks;
        self.apply(next);
    }

    /// Replaces the configuration and publishes what changed. Returns the
    /// changes. Subscribers that hung up are dropped.
    pub fn apply(&mut self, next: EngineConfig) -> Vec<ConfigChange> {
        let mut changes = Vec::new();
        if next.presentation.hud_hidden != self.current.presentation.hud_hidden {
            changes.push(ConfigChange::HudHidden(next.presentation.hud_hidden));
        }
        if next.storage.autosave_interval != self.current.storage.autosave_interval {
            changes.push(ConfigChange::AutosaveInterval(next.storage.autosave_interval));
        }
        self.current = next;

        if !changes.is_empty() {
            self.subscribers
                .retain(|tx| changes.iter().all(|c| tx.send(c.clone()).is_ok()));
        }
        changes
    }
}

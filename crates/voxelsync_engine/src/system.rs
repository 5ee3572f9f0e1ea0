//! Gameplay system registration and per-tick update.
//!
//! Systems run in registration order every tick, after inbound network
//! messages and queued events have been applied. Shutdown also runs in
//! registration order and happens at most once.

use log::{debug, warn};
use voxelsync_foundation::{Error, Result};
use voxelsync_storage::EntityManager;

use crate::dispatch::EventSystem;

// =============================================================================
// System Context
// =============================================================================

/// Collaborators a system may use during initialise and update.
pub struct SystemContext<'a> {
    /// The entity store.
    pub store: &'a mut EntityManager,
    /// Event dispatch; events published here are processed next tick.
    pub events: &'a mut EventSystem,
}

// =============================================================================
// Component System
// =============================================================================

/// A unit of gameplay logic.
pub trait ComponentSystem {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called once before the first update.
    ///
    /// # Errors
    ///
    /// An error aborts initialisation of the manager.
    fn initialise(&mut self, _ctx: &mut SystemContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called once per tick with the elapsed time in seconds.
    ///
    /// # Errors
    ///
    /// Errors are returned to the caller of [`ComponentSystemManager::update`].
    fn update(&mut self, ctx: &mut SystemContext<'_>, delta: f32) -> Result<()>;

    /// Called once during teardown.
    fn shutdown(&mut self) {}
}

// =============================================================================
// Manager
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Registering,
    Running,
    Shutdown,
}

/// Owns gameplay systems and drives them in registration order.
pub struct ComponentSystemManager {
    systems: Vec<Box<dyn ComponentSystem>>,
    stage: Stage,
}

impl ComponentSystemManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            systems: Vec::new(),
            stage: Stage::Registering,
        }
    }

    /// Adds a system to the end of the update order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` after shutdown.
    pub fn register(&mut self, system: Box<dyn ComponentSystem>) -> Result<()> {
        if self.stage == Stage::Shutdown {
            return Err(Error::invalid_transition(self.stage, "register"));
        }
        debug!("registered system {}", system.name());
        self.systems.push(system);
        Ok(())
    }

    /// Initialises every system in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first initialisation error.
    pub fn initialise(&mut self, ctx: &mut SystemContext<'_>) -> Result<()> {
        if self.stage != Stage::Registering {
            return Err(Error::invalid_transition(self.stage, Stage::Running));
        }
        for system in &mut self.systems {
            system.initialise(ctx)?;
        }
        self.stage = Stage::Running;
        Ok(())
    }

    /// Updates every system in registration order.
    ///
    /// Does nothing after shutdown.
    ///
    /// # Errors
    ///
    /// Returns the first update error; later systems do not run this tick.
    pub fn update(&mut self, ctx: &mut SystemContext<'_>, delta: f32) -> Result<()> {
        if self.stage == Stage::Shutdown {
            return Ok(());
        }
        for system in &mut self.systems {
            system.update(ctx, delta).inspect_err(|e| {
                warn!("system {} failed: {e}", system.name());
            })?;
        }
        Ok(())
    }

    /// Shuts down every system in registration order. Repeated calls do nothing.
    pub fn shutdown(&mut self) {
        if self.stage == Stage::Shutdown {
            return;
        }
        for system in &mut self.systems {
            system.shutdown();
        }
        self.stage = Stage::Shutdown;
        debug!("{} systems shut down", self.systems.len());
    }

    /// Names of registered systems in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.systems.iter().map(|s| s.name())
    }

    /// Number of registered systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Returns true if no systems are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Returns true once [`Self::shutdown`] has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.stage == Stage::Shutdown
    }
}

impl Default for ComponentSystemManager {
    fn default() -> Self {
        Self::new()
    }
}

//! The in-game lifecycle.
//!
//! [`IngameState`] drives one tick of the simulation in a fixed order and
//! tears the session down in a fixed order. Both orders are contracts: every
//! step assumes the steps before it have run.

use log::{debug, info, warn};
use voxelsync_engine::SystemContext;
use voxelsync_foundation::{Error, Result};
use voxelsync_network::{DisconnectedPlayer, NetworkMode, NetworkNotification};
use voxelsync_persistence::{StorageNotification, WorldSnapshot};

use crate::config::ConfigChange;
use crate::console::MessageKind;
use crate::context::IngameContext;

/// Title of the popup showing the server's message of the day.
pub const MOTD_TITLE: &str = "Server MOTD";

/// Lifecycle hooks called by the application driver.
pub trait GameState {
    /// Enters the state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot start; it is then unusable.
    fn init(&mut self) -> Result<()>;

    /// Advances one tick of `delta` seconds.
    ///
    /// # Errors
    ///
    /// Returns errors raised by gameplay code or event dispatch.
    fn update(&mut self, delta: f32) -> Result<()>;

    /// Processes input for `delta` seconds.
    fn handle_input(&mut self, delta: f32);

    /// Draws a frame.
    fn render(&mut self);

    /// Leaves the state, releasing everything it owns.
    fn dispose(&mut self, shutting_down: bool);

    /// Returns true if the driver may stop ticking while unfocused.
    fn is_hibernation_allowed(&self) -> bool;

    /// Label for log lines emitted while in this state.
    fn logging_phase(&self) -> &str;
}

/// Where the session is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Built, not yet started.
    Initializing,
    /// Ticking.
    Running,
    /// Tearing down.
    Disposing,
    /// Torn down.
    Disposed,
}

/// The in-game state: a world being simulated.
pub struct IngameState {
    ctx: IngameContext,
    phase: Phase,
    paused: bool,
    autosave_interval: u64,
    ticks_since_save: u64,
    leaving: Vec<DisconnectedPlayer>,
}

impl IngameState {
    /// Wraps a session; call [`GameState::init`] to start it.
    #[must_use]
    pub fn new(ctx: IngameContext) -> Self {
        let autosave_interval = ctx.config.storage.autosave_interval;
        Self {
            ctx,
            phase: Phase::Initializing,
            paused: false,
            autosave_interval,
            ticks_since_save: 0,
            leaving: Vec::new(),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The session.
    #[must_use]
    pub fn context(&self) -> &IngameContext {
        &self.ctx
    }

    /// The session, mutably.
    pub fn context_mut(&mut self) -> &mut IngameContext {
        &mut self.ctx
    }

    /// Stops world updates. Simulation, replication and saving continue.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resumes world updates.
    pub fn unpause(&mut self) {
        self.paused = false;
    }

    /// Flips the pause flag.
    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Returns true while paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Players whose despawn waits for a save to finish.
    #[must_use]
    pub fn pending_despawns(&self) -> usize {
        self.leaving.len()
    }

    fn is_authority(&self) -> bool {
        self.ctx.network.get_mode().is_authority()
    }

    /// Snapshots the world and hands it to storage. Blocks only if a save is
    /// already in flight.
    fn start_save(&mut self) -> Result<()> {
        let ctx = &mut self.ctx;
        let snapshot = WorldSnapshot::new(
            ctx.manifest.clone(),
            ctx.store.snapshot(),
            ctx.chunks.take_dirty_chunks(),
        );
        ctx.storage
            .wait_for_completion_of_previous_save_and_start_saving(snapshot)?;
        self.ticks_since_save = 0;
        Ok(())
    }

    fn try_save(&mut self, why: &str) {
        if let Err(e) = self.start_save() {
            warn!("{why} save failed to start: {e}");
            self.ctx
                .console
                .push(MessageKind::Error, format!("{why} save failed: {e}"));
        }
    }

    /// Saves and despawns players released by disconnects. Waits while a save
    /// is in flight so the tick never blocks.
    fn release_players(&mut self) {
        self.leaving.extend(self.ctx.network.take_disconnected());
        if self.leaving.is_empty() {
            return;
        }
        if !self.is_authority() {
            self.leaving.clear();
            return;
        }
        if self.ctx.storage.is_saving() {
            debug!("{} player despawns wait for the current save", self.leaving.len());
            return;
        }

        self.try_save("player");
        for player in std::mem::take(&mut self.leaving) {
            match self.ctx.store.destroy(player.entity) {
                Ok(()) => debug!("despawned {} ({})", player.name, player.client),
                Err(e) if e.is_dangling_entity() => {
                    debug!("player of {} already gone", player.name);
                }
                Err(e) => warn!("failed to despawn {}: {e}", player.name),
            }
        }
    }

    fn autosave(&mut self) {
        if self.autosave_interval == 0 || !self.is_authority() {
            return;
        }
        self.ticks_since_save += 1;
        if self.ticks_since_save < self.autosave_interval {
            return;
        }
        if self.ctx.storage.is_saving() {
            debug!("autosave deferred; previous save still running");
            return;
        }
        self.try_save("auto");
    }

    fn apply_config_changes(&mut self) {
        let Some(changes) = &self.ctx.config_changes else {
            return;
        };
        for change in changes.try_iter() {
            debug!("config change: {change:?}");
            match change {
                ConfigChange::HudHidden(hidden) => self.ctx.ui.set_hud_visible(!hidden),
                ConfigChange::AutosaveInterval(ticks) => self.autosave_interval = ticks,
            }
        }
    }

    fn flush_notifications(&mut self) {
        let ctx = &mut self.ctx;
        for note in ctx.storage.take_notifications() {
            let kind = match note {
                StorageNotification::SaveCompleted { .. } => MessageKind::Notification,
                StorageNotification::SaveFailed { .. }
                | StorageNotification::ChunkWriteFailed { .. } => MessageKind::Error,
            };
            ctx.console.push(kind, note.to_string());
        }
        for note in ctx.network.take_notifications() {
            let kind = match note {
                NetworkNotification::ClientJoined { .. } | NetworkNotification::ClientLeft { .. } => {
                    MessageKind::Notification
                }
                NetworkNotification::MutationRejected { .. } => MessageKind::Warning,
                NetworkNotification::ServerLost { .. } => MessageKind::Error,
            };
            ctx.console.push(kind, note.to_string());
        }
    }

    fn switch_to_empty_environment(&mut self, shutting_down: bool) {
        let ctx = &mut self.ctx;
        let previous = ctx.modules.environment();
        if let Err(e) = ctx.modules.load_environment(&[], true) {
            warn!("failed to load the empty environment: {e}");
            return;
        }
        if !shutting_down {
            ctx.switch_handler.handle_switch_to_empty_environment();
        }
        if let Some(previous) = previous {
            previous.close();
        }
    }

    fn ensure_running(&self, action: &str) -> Result<()> {
        if self.phase == Phase::Running {
            Ok(())
        } else {
            Err(Error::invalid_transition(self.phase, action))
        }
    }
}

impl GameState for IngameState {
    fn init(&mut self) -> Result<()> {
        if self.phase != Phase::Initializing {
            return Err(Error::invalid_transition(self.phase, Phase::Running));
        }
        let ctx = &mut self.ctx;
        ctx.ui.set_hud_visible(!ctx.config.presentation.hud_hidden);
        ctx.systems.initialise(&mut SystemContext {
            store: &mut ctx.store,
            events: &mut ctx.events,
        })?;

        if ctx.network.get_mode() == NetworkMode::Client {
            let motd = &ctx.network.get_server()?.motd;
            if !motd.is_empty() {
                ctx.ui.push_message_popup(MOTD_TITLE, motd);
            }
        }

        info!(
            "entered world '{}' ({} mode, {} systems)",
            ctx.manifest.title,
            ctx.network.get_mode(),
            ctx.systems.len()
        );
        self.phase = Phase::Running;
        Ok(())
    }

    fn update(&mut self, delta: f32) -> Result<()> {
        self.ensure_running("update")?;
        self.apply_config_changes();
        let ctx = &mut self.ctx;
        ctx.manifest.tick += 1;

        ctx.network
            .receive(&mut ctx.store, &mut ctx.events, ctx.chunks.as_mut())?;
        ctx.events.process(&mut ctx.store)?;
        ctx.systems.update(
            &mut SystemContext {
                store: &mut ctx.store,
                events: &mut ctx.events,
            },
            delta,
        )?;
        ctx.network.flush(
            &ctx.store,
            &mut ctx.events,
            ctx.chunks.as_mut(),
            ctx.storage.chunk_sink(),
        )?;
        if !self.paused {
            ctx.renderer.update(delta);
        }

        self.ctx.storage.update();
        self.release_players();
        self.autosave();

        self.ctx.ui.update(delta);
        self.flush_notifications();
        let ctx = &mut self.ctx;
        let seen = ctx.events.change_cursor().min(ctx.network.replication_cursor());
        ctx.store.discard_changes_through(seen);
        Ok(())
    }

    fn handle_input(&mut self, delta: f32) {
        if self.phase != Phase::Running {
            return;
        }
        self.ctx.camera.update(delta);
        self.ctx.input.update(delta);
    }

    fn render(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        self.ctx.renderer.render();
        self.ctx.ui.render();
    }

    fn dispose(&mut self, shutting_down: bool) {
        if matches!(self.phase, Phase::Disposing | Phase::Disposed) {
            return;
        }
        info!("leaving world '{}' (shutting down: {shutting_down})", self.ctx.manifest.title);
        self.phase = Phase::Disposing;
        let authority = self.is_authority();

        let ctx = &mut self.ctx;
        if let Err(e) = ctx.chunks.dispose(ctx.storage.chunk_sink()) {
            warn!("chunk disposal: {e}");
        }

        if authority {
            self.try_save("final");
            self.ctx.storage.wait_for_completion();
        }

        let ctx = &mut self.ctx;
        ctx.network.shutdown();
        if let Err(e) = ctx.events.process(&mut ctx.store) {
            warn!("events left unsettled at teardown: {e}");
        }
        ctx.ui.clear();
        ctx.audio.stop_all_sounds();
        ctx.renderer.dispose();
        ctx.systems.shutdown();
        ctx.physics.dispose();
        ctx.events.clear();
        let unloaded = ctx.store.entity_count();
        ctx.store.clear();
        ctx.switch_handler.handle_world_unloaded(unloaded);
        self.leaving.clear();
        ctx.storage.finish_saving_and_shutdown();
        self.flush_notifications();

        self.switch_to_empty_environment(shutting_down);
        self.ctx.console.dispose();
        self.ctx.config_changes = None;
        self.phase = Phase::Disposed;
    }

    fn is_hibernation_allowed(&self) -> bool {
        self.ctx.network.get_mode() == NetworkMode::None
    }

    fn logging_phase(&self) -> &str {
        &self.ctx.manifest.title
    }
}

impl Drop for IngameState {
    fn drop(&mut self) {
        if self.phase == Phase::Running {
            self.dispose(true);
        }
    }
}

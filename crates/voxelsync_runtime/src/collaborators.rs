//! Subsystems the lifecycle drives but does not implement.
//!
//! Each capability has a no-op variant chosen at composition time, so a
//! headless server wires in [`HeadlessRenderer`], [`NullAudio`] and friends
//! instead of special-casing their absence.

use log::info;

/// Draws the world.
pub trait WorldRenderer {
    /// Advances animations and chunk meshes.
    fn update(&mut self, delta: f32);
    /// Draws a frame.
    fn render(&mut self);
    /// Releases GPU resources.
    fn dispose(&mut self);
}

/// Plays sounds.
pub trait AudioManager {
    /// Silences everything.
    fn stop_all_sounds(&mut self);
}

/// Simulates rigid bodies.
pub trait PhysicsEngine {
    /// Drops every body and collider.
    fn dispose(&mut self);
}

/// Screens, popups and the HUD.
pub trait UiManager {
    /// Advances widgets.
    fn update(&mut self, delta: f32);
    /// Draws widgets.
    fn render(&mut self);
    /// Closes every screen.
    fn clear(&mut self);
    /// Shows a modal message.
    fn push_message_popup(&mut self, title: &str, message: &str);
    /// Shows or hides the HUD.
    fn set_hud_visible(&mut self, visible: bool);
}

/// Reads devices and raises input events.
pub trait InputSystem {
    /// Polls devices.
    fn update(&mut self, delta: f32);
}

/// Tracks what the camera looks at.
pub trait CameraTargetSystem {
    /// Recomputes the target.
    fn update(&mut self, delta: f32);
}

/// Renderer for processes without a display.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessRenderer;

impl WorldRenderer for HeadlessRenderer {
    fn update(&mut self, _delta: f32) {}
    fn render(&mut self) {}
    fn dispose(&mut self) {}
}

/// Audio for processes without sound.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudio;

impl AudioManager for NullAudio {
    fn stop_all_sounds(&mut self) {}
}

/// Physics for processes that do not simulate bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPhysics;

impl PhysicsEngine for NullPhysics {
    fn dispose(&mut self) {}
}

/// UI for processes without a display. Popups go to the log.
#[derive(Debug, Clone)]
pub struct HeadlessUi {
    hud_visible: bool,
}

impl HeadlessUi {
    /// Creates the UI with the HUD shown.
    #[must_use]
    pub fn new() -> Self {
        Self { hud_visible: true }
    }

    /// Whether the HUD would be shown.
    #[must_use]
    pub fn is_hud_visible(&self) -> bool {
        self.hud_visible
    }
}

impl Default for HeadlessUi {
    fn default() -> Self {
        Self::new()
    }
}

impl UiManager for HeadlessUi {
    fn update(&mut self, _delta: f32) {}

    fn render(&mut self) {}

    fn clear(&mut self) {}

    fn push_message_popup(&mut self, title: &str, message: &str) {
        info!("{title}: {message}");
    }

    fn set_hud_visible(&mut self, visible: bool) {
        self.hud_visible = visible;
    }
}

/// Input for processes without devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInput;

impl InputSystem for NullInput {
    fn update(&mut self, _delta: f32) {}
}

/// Camera tracking for processes without a camera.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCameraTarget;

impl CameraTargetSystem for NullCameraTarget {
    fn update(&mut self, _delta: f32) {}
}

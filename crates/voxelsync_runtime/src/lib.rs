//! Session lifecycle, content environments and configuration for voxelsync.
//!
//! This crate provides:
//! - [`IngameState`] - The per-tick driver and ordered teardown of a session
//! - [`IngameContext`] - The explicit set of collaborators a session runs on
//! - [`ModuleManager`] - Content environments, with [`StaticModuleManager`]
//! - [`EngineConfig`] - Layered configuration and live [`ConfigChange`]s
//! - [`MessageLog`] - In-session notifications
//! - The `voxelsync-server` dedicated server binary

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collaborators;
pub mod config;
pub mod console;
pub mod context;
pub mod module;
pub mod state;

pub use crate::collaborators::{
    AudioManager, CameraTargetSystem, HeadlessRenderer, HeadlessUi, InputSystem, NullAudio,
    NullCameraTarget, NullInput, NullPhysics, PhysicsEngine, UiManager, WorldRenderer,
};
pub use crate::config::{ConfigChange, ConfigWatcher, EngineConfig};
pub use crate::console::{Message, MessageKind, MessageLog};
pub use crate::context::{IngameContext, open_storage};
pub use crate::module::{
    Environment, EnvironmentSwitchHandler, Module, ModuleManager, NullSwitchHandler,
    StaticModuleManager,
};
pub use crate::state::{GameState, IngameState, MOTD_TITLE, Phase};

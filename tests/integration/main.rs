//! Integration tests across all layers
//!
//! Tests whole sessions: an authority and its clients driven through
//! `IngameState`, saving to disk and restarting from the save.

mod config;
mod session;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use voxelsync_engine::ViewDistance;
use voxelsync_foundation::ComponentKind;
use voxelsync_network::{ClientConnection, Color, Listener, NetworkCoordinator, NetworkMode};
use voxelsync_runtime::{
    EngineConfig, GameState, IngameContext, IngameState, Module, ModuleManager,
    StaticModuleManager, open_storage,
};
use voxelsync_storage::{ComponentDef, EventDef};

// =============================================================================
// Fixtures
// =============================================================================

/// A fresh directory under the system temp dir, unique per test and process.
pub fn temp_root(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!(
        "voxelsync_it_integration_{name}_{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&root);
    root
}

pub fn modules() -> StaticModuleManager {
    let mut modules = StaticModuleManager::new().with_module(
        Module::new("core")
            .with_component(ComponentDef::new("position"))
            .with_component(ComponentDef::new("health"))
            .with_component(ComponentDef::new("owner"))
            .with_component(ComponentDef::new("input").local_only())
            .with_event(EventDef::new("chat").replicable().server_event()),
    );
    modules.load_environment(&["core".to_string()], true).unwrap();
    modules
}

pub fn position(modules: &dyn ModuleManager) -> ComponentKind {
    modules
        .environment()
        .unwrap()
        .components()
        .resolve("position")
        .unwrap()
}

/// Config for a world saved under `root`, autosave off.
pub fn config(root: &Path) -> EngineConfig {
    EngineConfig::default()
        .with_world("plains", "Plains")
        .with_seed(5)
        .with_save_root(root)
        .with_autosave_interval(0)
        .with_motd("welcome")
}

/// A running authority listening on `listener`.
pub fn server(config: EngineConfig, listener: Box<dyn Listener>) -> IngameState {
    let modules = modules();
    let network = NetworkCoordinator::host(config.network_config(position(&modules)), listener);
    let storage = open_storage(&config, NetworkMode::Server).unwrap();
    let mut ctx = IngameContext::headless(config, Box::new(modules), network, storage).unwrap();
    ctx.restore_world().unwrap();
    let mut state = IngameState::new(ctx);
    state.init().unwrap();
    state
}

/// Joins `server` as `name` on a helper thread while the server ticks, then
/// wraps the connection in a running client session.
pub fn client(server: &mut IngameState, connection: ClientConnection, name: &'static str) -> IngameState {
    let modules = modules();
    let config = EngineConfig::default().with_storage_enabled(false);
    let net_config = config.network_config(position(&modules));
    let handle = thread::spawn(move || {
        NetworkCoordinator::join(net_config, connection, name, Color::WHITE, ViewDistance::NEAR)
    });
    for _ in 0..2000 {
        server.update(0.05).unwrap();
        if handle.is_finished() {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    let network = handle.join().unwrap().unwrap();

    let storage = open_storage(&config, NetworkMode::Client).unwrap();
    let ctx = IngameContext::headless(config, Box::new(modules), network, storage).unwrap();
    let mut state = IngameState::new(ctx);
    state.init().unwrap();
    state
}

/// Ticks both sessions until `done` holds or about two seconds pass.
pub fn tick_until(
    server: &mut IngameState,
    client: &mut IngameState,
    mut done: impl FnMut(&IngameState, &IngameState) -> bool,
) -> bool {
    for _ in 0..1000 {
        server.update(0.05).unwrap();
        client.update(0.05).unwrap();
        if done(server, client) {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

//! Integration tests for configuration
//!
//! Tests a session built from a configuration file and reacting to live
//! changes.

use std::fs;

use voxelsync_network::LocalTransport;
use voxelsync_persistence::StorageManager;
use voxelsync_runtime::{ConfigWatcher, EngineConfig, GameState};

use crate::{server, temp_root};

#[test]
fn file_settings_shape_the_session() {
    let root = temp_root("config_file");
    fs::create_dir_all(&root).unwrap();
    let path = root.join("server.toml");
    fs::write(
        &path,
        format!(
            "[world]\nworld_id = \"isles\"\ntitle = \"Isles\"\nseed = 99\n\n\
             [storage]\nsave_root = {:?}\nautosave_interval = 0\n",
            root.join("saves")
        ),
    )
    .unwrap();

    let config = EngineConfig::load(Some(&path)).unwrap();
    let (listener, _connector) = LocalTransport::pair();
    let mut state = server(config, Box::new(listener));
    assert_eq!(state.logging_phase(), "Isles");
    assert_eq!(state.context().manifest.seed, 99);
    state.dispose(true);

    assert!(root.join("saves").join("isles").join("manifest.msgpack").exists());
}

#[test]
fn autosave_starts_when_the_interval_is_lowered() {
    let root = temp_root("config_live");
    let mut watcher = ConfigWatcher::new(crate::config(&root));
    let changes = watcher.subscribe();
    let (listener, _connector) = LocalTransport::pair();
    let mut state = server(watcher.current().clone(), Box::new(listener));
    state.context_mut().config_changes = Some(changes);

    for _ in 0..5 {
        state.update(0.05).unwrap();
    }
    assert!(state.context().storage.load_manifest().unwrap().is_none());

    watcher.set_autosave_interval(2);
    for _ in 0..2 {
        state.update(0.05).unwrap();
    }
    state.context_mut().storage.wait_for_completion();
    let saved = state.context().storage.load_manifest().unwrap().unwrap();
    assert_eq!(saved.tick, 7);

    state.dispose(true);
}

//! Integration tests for live sessions
//!
//! Tests an authority and clients ticking together over the in-process
//! transport: joining, replication, leaving and teardown.

use voxelsync_foundation::{EntityId, Value, Vec3};
use voxelsync_network::{Client, LocalTransport, NetworkMode};
use voxelsync_persistence::{ReadWriteStorageManager, StorageManager};
use voxelsync_runtime::{GameState, IngameState, MessageKind, Phase};

use crate::{client, config, server, temp_root, tick_until};

fn player_of(server: &IngameState, name: &str) -> EntityId {
    server
        .context()
        .network
        .clients()
        .find(|c| c.name() == name)
        .map(|c| c.entity())
        .unwrap()
}

fn spawn_rock(server: &mut IngameState, health: i64) -> EntityId {
    let ctx = server.context_mut();
    let position = ctx.store.library().resolve("position").unwrap();
    let hp = ctx.store.library().resolve("health").unwrap();
    ctx.store
        .create_with([
            (position, Vec3::new(2.0, 0.0, 2.0).to_value()),
            (hp, Value::Int(health)),
        ])
        .unwrap()
}

fn mirrored_health(client: &IngameState) -> Vec<i64> {
    let store = &client.context().store;
    let hp = store.library().resolve("health").unwrap();
    let mut values: Vec<i64> = store
        .with_component(hp)
        .filter_map(|e| store.get(e, hp).ok().flatten().and_then(Value::as_int))
        .collect();
    values.sort_unstable();
    values
}

// =============================================================================
// Joining and replication
// =============================================================================

#[test]
fn client_mirrors_the_world_around_it() {
    let root = temp_root("mirror");
    let (listener, connector) = LocalTransport::pair();
    let mut host = server(config(&root), Box::new(listener));
    spawn_rock(&mut host, 30);

    let mut alice = client(&mut host, connector.connect().unwrap(), "alice");
    assert_eq!(alice.context().network.get_mode(), NetworkMode::Client);
    assert_eq!(alice.context().network.get_server().unwrap().motd, "welcome");

    assert!(tick_until(&mut host, &mut alice, |_, c| {
        c.context().network.remote_player().is_some() && mirrored_health(c) == vec![30]
    }));

    let rock = host
        .context()
        .store
        .with_component(host.context().store.library().resolve("health").unwrap())
        .next()
        .unwrap();
    let hp = host.context().store.library().resolve("health").unwrap();
    host.context_mut().store.attach(rock, hp, Value::Int(12)).unwrap();
    assert!(tick_until(&mut host, &mut alice, |_, c| mirrored_health(c) == vec![12]));

    alice.dispose(false);
    host.dispose(true);
}

#[test]
fn leaving_player_is_saved_then_despawned_everywhere() {
    let root = temp_root("leave");
    let (listener, connector) = LocalTransport::pair();
    let mut host = server(config(&root), Box::new(listener));
    let mut alice = client(&mut host, connector.connect().unwrap(), "alice");
    let mut bob = client(&mut host, connector.connect().unwrap(), "bob");
    let alice_player = player_of(&host, "alice");

    assert!(tick_until(&mut host, &mut bob, |_, b| b.context().store.entity_count() == 2));

    alice.dispose(false);
    assert_eq!(alice.phase(), Phase::Disposed);
    assert!(tick_until(&mut host, &mut bob, |h, _| {
        !h.context().store.is_alive(alice_player)
    }));

    // The save started before the despawn still holds both players.
    host.context_mut().storage.wait_for_completion();
    assert_eq!(host.context().storage.load_entities().unwrap().len(), 2);

    // The despawn replicates like any other destroy.
    assert!(tick_until(&mut host, &mut bob, |_, b| b.context().store.entity_count() == 1));
    assert!(host
        .context()
        .console
        .entries()
        .any(|m| m.kind == MessageKind::Notification && m.text.starts_with("alice left")));
    assert_eq!(host.pending_despawns(), 0);

    bob.dispose(false);
    host.dispose(true);
}

#[test]
fn server_teardown_saves_before_clients_are_dropped() {
    let root = temp_root("teardown");
    let (listener, connector) = LocalTransport::pair();
    let mut host = server(config(&root), Box::new(listener));
    spawn_rock(&mut host, 7);
    let mut alice = client(&mut host, connector.connect().unwrap(), "alice");
    assert!(tick_until(&mut host, &mut alice, |_, c| mirrored_health(c) == vec![7]));

    host.dispose(true);
    assert!(host.context().storage.is_shut_down());
    assert_eq!(host.context().store.entity_count(), 0);

    // The connected player was still in the world when it was saved.
    let stored = ReadWriteStorageManager::open(config(&root).save_paths()).unwrap();
    assert_eq!(stored.load_entities().unwrap().len(), 2);

    for _ in 0..500 {
        alice.update(0.05).unwrap();
        if alice
            .context()
            .console
            .entries()
            .any(|m| m.kind == MessageKind::Error)
        {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    assert!(alice
        .context()
        .console
        .entries()
        .any(|m| m.text.starts_with("disconnected from server")));
    alice.dispose(false);
}

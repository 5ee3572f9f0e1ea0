//! Integration tests for visibility-driven replication
//!
//! Tests that entities and events reach a client only while their region is in
//! its view.

use voxelsync_engine::{Event, Target};
use voxelsync_foundation::{Value, Vec3};
use voxelsync_network::{LocalTransport, NetworkCoordinator};

use crate::{World, join};

const FAR: Vec3 = Vec3::new(1000.0, 0.0, 0.0);
const NEAR: Vec3 = Vec3::new(40.0, 0.0, 0.0);

fn session() -> (NetworkCoordinator, World, NetworkCoordinator, World) {
    let mut world = World::new();
    let (listener, connector) = LocalTransport::pair();
    let mut server = NetworkCoordinator::host(world.config(), Box::new(listener));
    let remote = World::new();
    let client = join(
        &mut server,
        &mut world,
        connector.connect().unwrap(),
        "ada",
        remote.config(),
    );
    (server, world, client, remote)
}

#[test]
fn entities_follow_the_view_box() {
    let (mut server, mut world, mut client, mut remote) = session();
    let position = world.kind("position");
    let health = world.kind("health");
    let wanderer = world
        .store
        .create_with([(position, FAR.to_value()), (health, Value::Int(9))])
        .unwrap();

    world.tick(&mut server);
    remote.receive(&mut client);
    assert_eq!(remote.store.entity_count(), 1, "only the player is visible");

    world.store.attach(wanderer, position, NEAR.to_value()).unwrap();
    world.tick(&mut server);
    remote.receive(&mut client);
    assert_eq!(remote.store.entity_count(), 2);
    let mirrored: Vec<_> = remote
        .store
        .with_component(remote.kind("health"))
        .collect();
    assert_eq!(mirrored.len(), 1);
    assert_eq!(
        remote.store.get(mirrored[0], remote.kind("health")).unwrap(),
        Some(&Value::Int(9))
    );

    world.store.attach(wanderer, position, FAR.to_value()).unwrap();
    world.tick(&mut server);
    remote.receive(&mut client);
    assert_eq!(remote.store.entity_count(), 1);
    assert!(!remote.store.is_alive(mirrored[0]));
}

#[test]
fn destroyed_entities_disappear_from_clients() {
    let (mut server, mut world, mut client, mut remote) = session();
    let position = world.kind("position");
    let crate_entity = world
        .store
        .create_with([(position, NEAR.to_value())])
        .unwrap();
    world.tick(&mut server);
    remote.receive(&mut client);
    assert_eq!(remote.store.entity_count(), 2);

    world.store.destroy(crate_entity).unwrap();
    world.tick(&mut server);
    remote.receive(&mut client);
    assert_eq!(remote.store.entity_count(), 1);
}

#[test]
fn events_reach_clients_that_can_see_them() {
    let (mut server, mut world, mut client, mut remote) = session();
    let position = world.kind("position");
    let far_away = world
        .store
        .create_with([(position, FAR.to_value())])
        .unwrap();
    let lib = world.events.library().clone();
    let explosion = lib.resolve("explosion").unwrap();
    let footstep = lib.resolve("footstep").unwrap();
    world.tick(&mut server);
    remote.receive(&mut client);
    remote.events.process(&mut remote.store).unwrap();

    for (event, target) in [
        (Event::new(explosion, Value::Int(1)), Target::Broadcast),
        (Event::new(explosion, Value::Int(2)), Target::Entity(far_away)),
        (Event::new(footstep, Value::Nil), Target::Broadcast),
    ] {
        world.events.publish(event, target).unwrap();
    }
    world.tick(&mut server);
    remote.receive(&mut client);

    assert_eq!(remote.events.pending(), 1);
    let delivered = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = delivered.clone();
    let remote_explosion = remote.events.library().resolve("explosion").unwrap();
    remote.events.subscribe(remote_explosion, move |event, _, _| {
        sink.borrow_mut().push(event.payload.clone());
        Ok(())
    });
    remote.events.process(&mut remote.store).unwrap();
    assert_eq!(*delivered.borrow(), vec![Value::Int(1)]);
}

#[test]
fn slower_net_tick_batches_updates() {
    let mut world = World::new();
    let (listener, connector) = LocalTransport::pair();
    let config = world.config().with_net_tick_interval(3);
    let mut server = NetworkCoordinator::host(config, Box::new(listener));
    let mut remote = World::new();
    let mut client = join(
        &mut server,
        &mut world,
        connector.connect().unwrap(),
        "ada",
        remote.config(),
    );

    world.tick(&mut server);
    world.tick(&mut server);
    remote.receive(&mut client);
    assert!(client.remote_player().is_none());

    world.tick(&mut server);
    remote.receive(&mut client);
    assert!(client.remote_player().is_some());
}

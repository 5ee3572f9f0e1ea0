//! Integration tests for the TCP transport
//!
//! Tests a full join and replication round over loopback.

use voxelsync_foundation::{Value, Vec3};
use voxelsync_network::{
    Client, NetworkCoordinator, NetworkMode, NetworkNotification, TcpTransport,
};

use crate::{World, join, receive_until};

#[test]
fn join_and_replicate_over_loopback() {
    let mut world = World::new();
    let transport = TcpTransport::bind("127.0.0.1:0").unwrap();
    let addr = transport.addr();
    let mut server = NetworkCoordinator::host(world.config(), Box::new(transport));

    let mut remote = World::new();
    let connection = TcpTransport::connect(addr).unwrap();
    let mut client = join(&mut server, &mut world, connection, "tcp", remote.config());
    assert_eq!(client.get_mode(), NetworkMode::Client);
    assert_eq!(client.get_server().unwrap().world_title, "plains");

    let health = world.kind("health");
    let player = server.clients().next().map(|c| c.entity()).unwrap();
    world.store.attach(player, health, Value::Int(12)).unwrap();
    world.tick(&mut server);

    let remote_health = remote.kind("health");
    let arrived = receive_until(&mut client, &mut remote, |net, w| {
        net.remote_player()
            .is_some_and(|p| w.store.get(p, remote_health).ok().flatten().is_some())
    });
    assert!(arrived, "player never replicated");
    let mirrored = client.remote_player().unwrap();
    assert_eq!(
        remote.store.get(mirrored, remote.kind("position")).unwrap(),
        Some(&Vec3::default().to_value())
    );

    server.shutdown();
    let mut notes = Vec::new();
    for _ in 0..1000 {
        remote.receive(&mut client);
        notes.extend(client.take_notifications());
        if !notes.is_empty() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    assert!(matches!(
        notes.as_slice(),
        [NetworkNotification::ServerLost { .. }]
    ));
}

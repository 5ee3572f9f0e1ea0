//! Replication and connectivity for voxelsync.
//!
//! This crate provides:
//! - [`NetworkCoordinator`] - Authority mode, client registry and per-tick replication
//! - [`Client`] - The participant contract, with [`LocalClient`] and [`NetClient`]
//! - [`protocol`] - `MessagePack` wire messages and length-prefixed framing
//! - [`LocalTransport`] and [`TcpTransport`] - Ways to connect clients

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod coordinator;
pub mod mode;
pub mod protocol;
pub mod transport;

pub use client::{Client, LocalClient, NetClient, ProxyState, RegionListener, ReplicationView};
pub use coordinator::{
    DisconnectedPlayer, MutationOutcome, NetworkConfig, NetworkCoordinator, NetworkNotification,
};
pub use mode::{Color, NetworkMode, ServerInfo};
pub use protocol::{ClientMessage, Mutation, ServerMessage};
pub use transport::{
    ClientConnection, Connection, Listener, LocalConnector, LocalListener, LocalTransport,
    ServerConnection, TcpTransport,
};

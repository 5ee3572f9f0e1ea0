//! The network coordinator.
//!
//! Owns the authority mode, every client, the region tracker and the spatial
//! index. Each tick the lifecycle calls [`NetworkCoordinator::receive`] before
//! gameplay systems and [`NetworkCoordinator::flush`] after them, so inbound
//! messages and outbound deltas never straddle a tick.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use voxelsync_engine::{
    Chunk, ChunkProvider, ChunkSink, Event, EventSystem, RegionConfig, RegionDelta,
    RegionTracker, SpatialIndex, Target, ViewDistance,
};
use voxelsync_foundation::{ClientId, ComponentKind, EntityId, Error, Limit, RegionPos, Result, Vec3};
use voxelsync_storage::{EntityManager, EntityRecord};

use crate::client::{Client, LocalClient, NetClient, ProxyState, RegionListener, ReplicationView};
use crate::mode::{Color, NetworkMode, ServerInfo};
use crate::protocol::{ClientMessage, Mutation, ServerMessage};
use crate::transport::{ClientConnection, Listener};

// =============================================================================
// Configuration
// =============================================================================

/// Coordinator settings.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Ticks between replication flushes. 1 flushes every tick.
    pub net_tick_interval: u32,
    /// Inbound messages applied per connection per tick; the rest wait.
    pub max_inbound_per_tick: usize,
    /// Descriptor sent to joining clients.
    pub server_info: ServerInfo,
    /// Region geometry.
    pub regions: RegionConfig,
    /// Component holding entity positions as `{x, y, z}`.
    pub position: ComponentKind,
    /// Where new players appear.
    pub spawn: Vec3,
    /// How long [`NetworkCoordinator::join`] waits for the handshake.
    pub join_timeout: Duration,
    /// Largest view radius, in regions, any observer is granted.
    pub max_view_distance: u32,
}

impl NetworkConfig {
    /// Creates a configuration with default limits.
    #[must_use]
    pub fn new(position: ComponentKind) -> Self {
        Self {
            net_tick_interval: 1,
            max_inbound_per_tick: 256,
            server_info: ServerInfo::default(),
            regions: RegionConfig::default(),
            position,
            spawn: Vec3::default(),
            join_timeout: Duration::from_secs(5),
            max_view_distance: 32,
        }
    }

    /// Sets the flush interval.
    #[must_use]
    pub fn with_net_tick_interval(mut self, ticks: u32) -> Self {
        self.net_tick_interval = ticks.max(1);
        self
    }

    /// Sets the inbound message cap.
    #[must_use]
    pub fn with_max_inbound_per_tick(mut self, limit: usize) -> Self {
        self.max_inbound_per_tick = limit.max(1);
        self
    }

    /// Sets the server descriptor.
    #[must_use]
    pub fn with_server_info(mut self, info: ServerInfo) -> Self {
        self.server_info = info;
        self
    }

    /// Sets the region geometry.
    #[must_use]
    pub fn with_regions(mut self, regions: RegionConfig) -> Self {
        self.regions = regions;
        self
    }

    /// Sets the spawn point.
    #[must_use]
    pub fn with_spawn(mut self, spawn: Vec3) -> Self {
        self.spawn = spawn;
        self
    }

    /// Sets the view radius cap.
    #[must_use]
    pub fn with_max_view_distance(mut self, radius: u32) -> Self {
        self.max_view_distance = radius;
        self
    }

    /// `distance` limited to the configured cap.
    #[must_use]
    pub fn clamp_view_distance(&self, distance: ViewDistance) -> ViewDistance {
        ViewDistance::new(distance.radius().min(self.max_view_distance))
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// Something the session should be told about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkNotification {
    /// A remote player joined.
    ClientJoined {
        /// Client id.
        client: ClientId,
        /// Display name.
        name: String,
    },
    /// A remote player left or was dropped.
    ClientLeft {
        /// Client id.
        client: ClientId,
        /// Display name.
        name: String,
        /// Why.
        reason: String,
    },
    /// The authority refused a mutation.
    MutationRejected {
        /// Request id.
        request: u64,
        /// Why.
        reason: String,
    },
    /// The connection to the authority is gone.
    ServerLost {
        /// Why.
        reason: String,
    },
}

impl fmt::Display for NetworkNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientJoined { name, .. } => write!(f, "{name} joined"),
            Self::ClientLeft { name, reason, .. } => write!(f, "{name} left ({reason})"),
            Self::MutationRejected { request, reason } => {
                write!(f, "request {request} rejected: {reason}")
            }
            Self::ServerLost { reason } => write!(f, "disconnected from server: {reason}"),
        }
    }
}

/// A player entity released by a disconnect, for the lifecycle to save and despawn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisconnectedPlayer {
    /// Client id.
    pub client: ClientId,
    /// Display name.
    pub name: String,
    /// The player entity.
    pub entity: EntityId,
}

/// Result of [`NetworkCoordinator::request_mutation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Applied to the local store.
    Applied {
        /// Entity created by a spawn.
        spawned: Option<EntityId>,
    },
    /// Sent to the authority; applied when confirmed.
    Pending {
        /// Request id.
        request: u64,
    },
}

// =============================================================================
// Client mode link
// =============================================================================

struct ServerLink {
    connection: ClientConnection,
    info: ServerInfo,
    client: ClientId,
    player: EntityId,
    remote_to_local: HashMap<EntityId, EntityId>,
    local_to_remote: HashMap<EntityId, EntityId>,
    pending: BTreeMap<u64, Mutation>,
    next_request: u64,
    regions: HashMap<RegionPos, Option<Chunk>>,
    lost: bool,
}

impl ServerLink {
    fn local_of(&self, remote: EntityId) -> EntityId {
        self.remote_to_local
            .get(&remote)
            .copied()
            .unwrap_or_else(EntityId::null)
    }

    fn remote_of(&self, local: EntityId) -> EntityId {
        self.local_to_remote
            .get(&local)
            .copied()
            .unwrap_or_else(EntityId::null)
    }

    fn map(&mut self, remote: EntityId, local: EntityId) {
        self.remote_to_local.insert(remote, local);
        self.local_to_remote.insert(local, remote);
    }

    fn unmap(&mut self, remote: EntityId) -> Option<EntityId> {
        let local = self.remote_to_local.remove(&remote)?;
        self.local_to_remote.remove(&local);
        Some(local)
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Owns the network role, the clients and replication state.
pub struct NetworkCoordinator {
    mode: NetworkMode,
    config: NetworkConfig,
    tracker: RegionTracker,
    index: SpatialIndex,
    local: Option<LocalClient>,
    clients: BTreeMap<ClientId, NetClient>,
    listener: Option<Box<dyn Listener>>,
    server: Option<ServerLink>,
    next_client: u64,
    tick: u64,
    replication_cursor: u64,
    leave_reasons: HashMap<ClientId, String>,
    disconnected: Vec<DisconnectedPlayer>,
    notifications: Vec<NetworkNotification>,
    shut_down: bool,
}

impl NetworkCoordinator {
    /// A coordinator with no network activity.
    #[must_use]
    pub fn new_standalone(config: NetworkConfig) -> Self {
        Self::with_mode(NetworkMode::None, config)
    }

    /// A coordinator hosting remote clients accepted by `listener`.
    #[must_use]
    pub fn host(config: NetworkConfig, listener: Box<dyn Listener>) -> Self {
        info!("hosting on {}", listener.local_addr());
        let mut coordinator = Self::with_mode(NetworkMode::Server, config);
        coordinator.listener = Some(listener);
        coordinator
    }

    /// Joins a remote authority, blocking until the handshake completes.
    ///
    /// # Errors
    ///
    /// Returns `Network` if the authority refuses, replies with anything but a
    /// welcome, or does not answer within the configured timeout.
    pub fn join(
        config: NetworkConfig,
        connection: ClientConnection,
        name: impl Into<String>,
        color: Color,
        view_distance: ViewDistance,
    ) -> Result<Self> {
        let name = name.into();
        let view_distance = config.clamp_view_distance(view_distance);
        connection.send(ClientMessage::Join {
            name: name.clone(),
            color,
            view_distance: view_distance.radius(),
        })?;

        let reply = connection.recv_timeout(config.join_timeout)?;
        let (client, info, player) = match reply {
            Some(ServerMessage::Welcome {
                client,
                info,
                player,
            }) => (ClientId(client), info, player),
            Some(ServerMessage::Disconnect { reason }) => {
                return Err(Error::network(format!("join refused: {reason}")));
            }
            Some(other) => {
                return Err(Error::network(format!(
                    "unexpected handshake reply: {other:?}"
                )));
            }
            None => return Err(Error::network("timed out waiting for the server")),
        };

        info!("joined {} as {client} ({name})", info.name);
        let mut coordinator = Self::with_mode(NetworkMode::Client, config);
        coordinator.local = Some(
            LocalClient::new(name, EntityId::null())
                .with_color(color)
                .with_view_distance(view_distance),
        );
        coordinator.server = Some(ServerLink {
            connection,
            info,
            client,
            player,
            remote_to_local: HashMap::new(),
            local_to_remote: HashMap::new(),
            pending: BTreeMap::new(),
            next_request: 0,
            regions: HashMap::new(),
            lost: false,
        });
        Ok(coordinator)
    }

    fn with_mode(mode: NetworkMode, config: NetworkConfig) -> Self {
        Self {
            mode,
            tracker: RegionTracker::new(config.regions),
            index: SpatialIndex::new(config.position, config.regions.size),
            config,
            local: None,
            clients: BTreeMap::new(),
            listener: None,
            server: None,
            next_client: ClientId::LOCAL.raw() + 1,
            tick: 0,
            replication_cursor: 0,
            leave_reasons: HashMap::new(),
            disconnected: Vec::new(),
            notifications: Vec::new(),
            shut_down: false,
        }
    }

    // --- Accessors ---

    /// The authority mode.
    #[must_use]
    pub fn get_mode(&self) -> NetworkMode {
        self.mode
    }

    /// The remote authority's descriptor.
    ///
    /// # Errors
    ///
    /// Returns `WrongMode` unless this process is a client.
    pub fn get_server(&self) -> Result<&ServerInfo> {
        match (&self.server, self.mode) {
            (Some(link), NetworkMode::Client) => Ok(&link.info),
            _ => Err(Error::wrong_mode(
                NetworkMode::Client.to_string(),
                self.mode.to_string(),
            )),
        }
    }

    /// Id the authority assigned to this client.
    #[must_use]
    pub fn client_id(&self) -> Option<ClientId> {
        self.server.as_ref().map(|link| link.client)
    }

    /// Settings.
    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Region observers.
    #[must_use]
    pub fn tracker(&self) -> &RegionTracker {
        &self.tracker
    }

    /// Entity regions.
    #[must_use]
    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Every client, local first.
    pub fn clients(&self) -> impl Iterator<Item = &dyn Client> {
        self.local
            .iter()
            .map(|c| c as &dyn Client)
            .chain(self.clients.values().map(|c| c as &dyn Client))
    }

    /// One client.
    #[must_use]
    pub fn client(&self, id: ClientId) -> Option<&dyn Client> {
        if id == ClientId::LOCAL {
            self.local.as_ref().map(|c| c as &dyn Client)
        } else {
            self.clients.get(&id).map(|c| c as &dyn Client)
        }
    }

    /// A remote proxy.
    #[must_use]
    pub fn net_client(&self, id: ClientId) -> Option<&NetClient> {
        self.clients.get(&id)
    }

    /// The local player, if one is set.
    #[must_use]
    pub fn local_player(&self) -> Option<&LocalClient> {
        self.local.as_ref()
    }

    /// The local player, mutably.
    pub fn local_player_mut(&mut self) -> Option<&mut LocalClient> {
        self.local.as_mut()
    }

    /// Sets the player at this process.
    ///
    /// # Errors
    ///
    /// Returns `WrongMode` in client mode, where the authority owns the player.
    pub fn set_local_player(&mut self, mut client: LocalClient) -> Result<()> {
        if self.mode == NetworkMode::Client {
            return Err(Error::wrong_mode("authority", self.mode.to_string()));
        }
        let distance = self.config.clamp_view_distance(client.view_distance());
        client.set_view_distance_mode(distance);
        self.local = Some(client);
        Ok(())
    }

    /// In client mode, the local mirror of this client's player entity.
    #[must_use]
    pub fn remote_player(&self) -> Option<EntityId> {
        let link = self.server.as_ref()?;
        let local = link.local_of(link.player);
        (!local.is_null()).then_some(local)
    }

    /// In client mode, the chunk the authority sent for a region.
    #[must_use]
    pub fn remote_chunk(&self, pos: RegionPos) -> Option<&Chunk> {
        self.server.as_ref()?.regions.get(&pos)?.as_ref()
    }

    /// Sequence number of the newest store change replication has seen.
    #[must_use]
    pub fn replication_cursor(&self) -> u64 {
        self.replication_cursor
    }

    /// Returns true once [`Self::shutdown`] has completed.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Takes players released by disconnects since the last call.
    pub fn take_disconnected(&mut self) -> Vec<DisconnectedPlayer> {
        std::mem::take(&mut self.disconnected)
    }

    /// Takes notifications raised since the last call.
    pub fn take_notifications(&mut self) -> Vec<NetworkNotification> {
        std::mem::take(&mut self.notifications)
    }

    // --- Tick ---

    /// Applies inbound messages. Runs before gameplay systems.
    ///
    /// Lost connections become disconnects; they never fail the tick.
    ///
    /// # Errors
    ///
    /// Returns an error only if loading a chunk for a view-distance change fails.
    pub fn receive(
        &mut self,
        store: &mut EntityManager,
        events: &mut EventSystem,
        chunks: &mut dyn ChunkProvider,
    ) -> Result<()> {
        match self.mode {
            NetworkMode::Server => self.receive_as_server(store, events, chunks),
            NetworkMode::Client => {
                self.receive_as_client(store, events);
                Ok(())
            }
            NetworkMode::None => Ok(()),
        }
    }

    /// Recomputes visibility and sends deltas. Runs after gameplay systems.
    ///
    /// Chunks of newly observed regions are loaded through `chunks`; chunks of
    /// evicted regions are unloaded into `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk cannot be loaded.
    pub fn flush(
        &mut self,
        store: &EntityManager,
        events: &mut EventSystem,
        chunks: &mut dyn ChunkProvider,
        sink: &mut dyn ChunkSink,
    ) -> Result<()> {
        self.tick += 1;
        let net_tick = self.tick % u64::from(self.config.net_tick_interval) == 0;

        let moves = self.index.sync(store);
        self.update_observers(store, chunks)?;
        for pos in self.tracker.take_evicted() {
            if let Err(e) = chunks.on_region_evicted(pos, sink) {
                warn!("failed to unload chunk {pos:?}: {e}");
            }
        }

        match self.mode {
            NetworkMode::Server => {
                for m in &moves {
                    if let Some(from) = m.from {
                        for id in self.tracker.observers_of(from) {
                            if let Some(client) = self.clients.get_mut(&id) {
                                client.touch(m.entity);
                            }
                        }
                    }
                }
                for change in store.changes_since(self.replication_cursor) {
                    let entity = change.kind.entity();
                    if let Some(region) = self.index.region_of(entity) {
                        for id in self.tracker.observers_of(region) {
                            if let Some(client) = self.clients.get_mut(&id) {
                                client.touch(entity);
                            }
                        }
                    }
                    for client in self.clients.values_mut() {
                        if client.entity() == entity {
                            client.touch(entity);
                        }
                    }
                }
                self.route_events(events);

                let snapshot = store.snapshot();
                let view = ReplicationView {
                    snapshot: &snapshot,
                    events: events.library(),
                    tracker: &self.tracker,
                    index: &self.index,
                };
                for client in self.clients.values_mut() {
                    client.update(net_tick, &view);
                }
            }
            NetworkMode::Client => self.forward_server_events(events),
            NetworkMode::None => self.route_events(events),
        }
        self.replication_cursor = store.last_seq();
        Ok(())
    }

    /// Changes a client's view distance and recomputes its regions immediately.
    ///
    /// In client mode the authority is told as well.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` for an unknown client, or a chunk load error.
    pub fn set_view_distance(
        &mut self,
        client: ClientId,
        distance: ViewDistance,
        chunks: &mut dyn ChunkProvider,
    ) -> Result<()> {
        let distance = self.config.clamp_view_distance(distance);
        match self.client_mut(client) {
            Some(c) => c.set_view_distance_mode(distance),
            None => return Err(Error::disconnected(client)),
        }
        if let Some(link) = self.server.as_ref().filter(|l| !l.lost) {
            link.connection
                .send(ClientMessage::SetViewDistance(distance.radius()))?;
        }
        if let Some(delta) = self.tracker.set_view_distance(client, distance) {
            self.apply_delta(client, &delta, chunks)?;
        }
        Ok(())
    }

    /// Applies or requests a mutation of authoritative state.
    ///
    /// As authority the mutation is applied now. As a client it is sent to the
    /// authority and applied when confirmed.
    ///
    /// # Errors
    ///
    /// As authority, the mutation's own error. As a client, `EntityNotFound`
    /// for an entity the authority never sent, or `Network` if disconnected.
    pub fn request_mutation(
        &mut self,
        store: &mut EntityManager,
        mutation: Mutation,
    ) -> Result<MutationOutcome> {
        if self.mode.is_authority() {
            return mutation
                .apply(store)
                .map(|spawned| MutationOutcome::Applied { spawned });
        }

        let link = self
            .server
            .as_mut()
            .filter(|l| !l.lost)
            .ok_or_else(|| Error::network("not connected to a server"))?;
        if let Some(local) = mutation.entity() {
            if link.remote_of(local).is_null() {
                return Err(Error::entity_not_found(local));
            }
        }
        let remote = mutation.remap(&mut |e| link.remote_of(e));
        link.next_request += 1;
        let request = link.next_request;
        link.connection.send(ClientMessage::RequestMutation {
            request,
            mutation: remote,
        })?;
        link.pending.insert(request, mutation);
        Ok(MutationOutcome::Pending { request })
    }

    /// Closes every connection and waits for all I/O threads.
    ///
    /// Afterwards the mode is [`NetworkMode::None`]. Repeated calls do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        if let Some(mut listener) = self.listener.take() {
            listener.shutdown();
        }
        for (_, mut client) in std::mem::take(&mut self.clients) {
            if client.is_active() {
                client.send_now(ServerMessage::Disconnect {
                    reason: "server shutting down".into(),
                });
            }
            client.disconnect();
            if let Err(e) = client.close() {
                debug!("{}: {e}", client.id());
            }
        }
        if let Some(mut link) = self.server.take() {
            if !link.lost {
                let _ = link.connection.send(ClientMessage::Disconnect);
            }
            link.connection.close();
        }
        if let Some(local) = self.local.as_mut() {
            local.disconnect();
        }
        self.tracker.clear();
        self.index.clear();
        self.leave_reasons.clear();
        info!("network shut down ({})", self.mode);
        self.mode = NetworkMode::None;
        self.shut_down = true;
    }

    // --- Server side ---

    fn receive_as_server(
        &mut self,
        store: &mut EntityManager,
        events: &mut EventSystem,
        chunks: &mut dyn ChunkProvider,
    ) -> Result<()> {
        if let Some(listener) = self.listener.as_mut() {
            for connection in listener.poll_connections() {
                let id = ClientId(self.next_client);
                self.next_client += 1;
                info!("{id} connected from {}", connection.peer());
                self.clients.insert(id, NetClient::new(id, connection));
            }
        }

        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            let limit = self.config.max_inbound_per_tick;
            let mut applied = 0;
            loop {
                if applied == limit {
                    debug!("{id}: {}, rest deferred", Limit::MaxInboundMessages { limit });
                    break;
                }
                let Some(client) = self.clients.get_mut(&id) else {
                    break;
                };
                match client.poll() {
                    Ok(Some(message)) => {
                        applied += 1;
                        self.handle_client_message(id, message, store, events, chunks)?;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("{id}: {e}");
                        self.drop_client(id, "connection lost");
                        break;
                    }
                }
            }
        }

        self.release_disconnected();
        Ok(())
    }

    fn handle_client_message(
        &mut self,
        id: ClientId,
        message: ClientMessage,
        store: &mut EntityManager,
        events: &mut EventSystem,
        chunks: &mut dyn ChunkProvider,
    ) -> Result<()> {
        let Some(client) = self.clients.get_mut(&id) else {
            return Ok(());
        };
        match message {
            ClientMessage::Join {
                name,
                color,
                view_distance,
            } => {
                if client.state() != ProxyState::Connecting {
                    warn!("{id}: ignoring repeated join");
                    return Ok(());
                }
                let spawn = (self.config.position, self.config.spawn.to_value());
                let entity = store.create_with([spawn])?;
                let distance = self.config.clamp_view_distance(ViewDistance::new(view_distance));
                client.activate(name.clone(), color, distance, entity)?;
                client.send_now(ServerMessage::Welcome {
                    client: id.raw(),
                    info: self.config.server_info.clone(),
                    player: entity,
                });
                info!("{id} joined as {name}");
                self.notifications
                    .push(NetworkNotification::ClientJoined { client: id, name });
            }
            ClientMessage::SetViewDistance(radius) => {
                if client.is_active() {
                    self.set_view_distance(id, ViewDistance::new(radius), chunks)?;
                }
            }
            ClientMessage::RequestMutation { request, mutation } => {
                if !client.is_active() {
                    return Ok(());
                }
                let reply = match mutation.apply(store) {
                    Ok(spawned) => ServerMessage::MutationConfirmed { request, spawned },
                    Err(e) => {
                        debug!("{id}: rejected request {request}: {e}");
                        ServerMessage::MutationRejected {
                            request,
                            reason: e.to_string(),
                        }
                    }
                };
                client.send_now(reply);
            }
            ClientMessage::Event {
                name,
                payload,
                target,
            } => {
                let kind = events
                    .library()
                    .kind(&name)
                    .filter(|k| events.library().info(*k).is_some_and(|i| i.server_event));
                match kind {
                    Some(kind) if client.is_active() => {
                        let event = Event::new(kind, payload).from_entity(client.entity());
                        events.publish(event, target)?;
                    }
                    Some(_) => {}
                    None => warn!("{id}: dropping event {name}, not a server event"),
                }
            }
            ClientMessage::Disconnect => self.drop_client(id, "left"),
        }
        Ok(())
    }

    fn drop_client(&mut self, id: ClientId, reason: &str) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.disconnect();
            self.leave_reasons
                .entry(id)
                .or_insert_with(|| reason.to_string());
        }
    }

    fn release_disconnected(&mut self) {
        let leaving: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, c)| c.state() == ProxyState::Disconnecting)
            .map(|(id, _)| *id)
            .collect();

        for id in leaving {
            let released = self.tracker.remove_observer(id);
            let Some(mut client) = self.clients.remove(&id) else {
                continue;
            };
            if let Err(e) = client.close() {
                warn!("{id}: {e}");
            }
            debug!("{id} released from {} regions", released.len());
            let reason = self
                .leave_reasons
                .remove(&id)
                .unwrap_or_else(|| "connection lost".to_string());
            if client.entity().is_null() {
                continue;
            }
            info!("{id} ({}) left: {reason}", client.name());
            self.notifications.push(NetworkNotification::ClientLeft {
                client: id,
                name: client.name().to_string(),
                reason,
            });
            self.disconnected.push(DisconnectedPlayer {
                client: id,
                name: client.name().to_string(),
                entity: client.entity(),
            });
        }
    }

    /// Delivers replicated events to every client that can see their target.
    fn route_events(&mut self, events: &mut EventSystem) {
        for envelope in events.drain_replicated() {
            let region = envelope.target.entity().and_then(|e| self.index.region_of(e));
            let clients = self
                .local
                .iter_mut()
                .map(|c| c as &mut dyn Client)
                .chain(self.clients.values_mut().map(|c| c as &mut dyn Client));
            for client in clients {
                let relevant = match envelope.target {
                    Target::Broadcast => true,
                    Target::Entity(e) => {
                        client.entity() == e
                            || region.is_some_and(|r| self.tracker.can_see(client.id(), r))
                    }
                };
                if relevant {
                    client.send(&envelope.event, envelope.target);
                }
            }
        }
    }

    // --- Client side ---

    fn receive_as_client(&mut self, store: &mut EntityManager, events: &mut EventSystem) {
        let limit = self.config.max_inbound_per_tick;
        let Some(link) = self.server.as_mut().filter(|l| !l.lost) else {
            return;
        };
        for _ in 0..limit {
            match link.connection.try_recv() {
                Ok(Some(message)) => {
                    let lost =
                        apply_server_message(link, message, store, events, &mut self.notifications);
                    if let Some(reason) = lost {
                        lose_server(link, &reason, &mut self.notifications);
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    lose_server(link, &e.to_string(), &mut self.notifications);
                    return;
                }
            }
        }
        debug!("server: {}, rest deferred", Limit::MaxInboundMessages { limit });
    }

    fn forward_server_events(&mut self, events: &mut EventSystem) {
        let outbound = events.drain_replicated();
        let Some(link) = self.server.as_mut().filter(|l| !l.lost) else {
            return;
        };
        let library = events.library();
        for envelope in outbound {
            let Some(info) = library.info(envelope.event.kind) else {
                continue;
            };
            if !info.server_event {
                continue;
            }
            let target = match envelope.target {
                Target::Entity(e) => Target::Entity(link.remote_of(e)),
                Target::Broadcast => Target::Broadcast,
            };
            let sent = link.connection.send(ClientMessage::Event {
                name: info.name.to_string(),
                payload: envelope.event.payload.remap_entities(&mut |e| link.remote_of(e)),
                target,
            });
            if sent.is_err() {
                lose_server(link, "connection lost", &mut self.notifications);
                return;
            }
        }
    }

    // --- Regions ---

    fn client_mut(&mut self, id: ClientId) -> Option<&mut dyn Client> {
        if id == ClientId::LOCAL {
            self.local.as_mut().map(|c| c as &mut dyn Client)
        } else {
            self.clients.get_mut(&id).map(|c| c as &mut dyn Client)
        }
    }

    fn update_observers(
        &mut self,
        store: &EntityManager,
        chunks: &mut dyn ChunkProvider,
    ) -> Result<()> {
        let position = self.config.position;
        let observers: Vec<(ClientId, EntityId, ViewDistance)> = self
            .local
            .iter()
            .map(|c| (c.id(), self.observed_entity(c), c.view_distance()))
            .chain(
                self.clients
                    .values()
                    .filter(|c| c.is_active())
                    .map(|c| (c.id(), c.entity(), c.view_distance())),
            )
            .collect();

        for (id, entity, distance) in observers {
            let Some(pos) = store
                .get(entity, position)
                .ok()
                .flatten()
                .and_then(Vec3::from_value)
            else {
                continue;
            };
            let delta = self.tracker.update_observer_position(id, pos, distance);
            self.apply_delta(id, &delta, chunks)?;
        }
        Ok(())
    }

    fn observed_entity(&self, local: &LocalClient) -> EntityId {
        if self.mode == NetworkMode::Client {
            self.remote_player().unwrap_or_else(EntityId::null)
        } else {
            local.entity()
        }
    }

    fn apply_delta(
        &mut self,
        id: ClientId,
        delta: &RegionDelta,
        chunks: &mut dyn ChunkProvider,
    ) -> Result<()> {
        // Client mode mirrors chunks from the authority; nothing to load.
        if self.mode != NetworkMode::Client {
            for &pos in &delta.entered {
                chunks.on_region_entered(pos)?;
            }
        }

        let listener: &mut dyn RegionListener = if id == ClientId::LOCAL {
            match self.local.as_mut() {
                Some(local) => local,
                None => return Ok(()),
            }
        } else {
            match self.clients.get_mut(&id) {
                Some(client) => client,
                None => return Ok(()),
            }
        };
        for &pos in &delta.entered {
            listener.on_region_entered(pos, chunks.chunk(pos));
        }
        for &pos in &delta.exited {
            listener.on_region_exited(pos);
        }

        if let Some(client) = self.clients.get_mut(&id) {
            for &pos in &delta.entered {
                for entity in self.index.entities_in(pos) {
                    client.touch(entity);
                }
            }
            if !delta.exited.is_empty() {
                client.touch_known();
            }
        }
        Ok(())
    }
}

impl fmt::Debug for NetworkCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCoordinator")
            .field("mode", &self.mode)
            .field("clients", &self.clients.len())
            .field("tick", &self.tick)
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Client mode helpers
// =============================================================================

/// Applies one message from the authority. Returns a reason if the link is lost.
fn apply_server_message(
    link: &mut ServerLink,
    message: ServerMessage,
    store: &mut EntityManager,
    events: &mut EventSystem,
    notifications: &mut Vec<NetworkNotification>,
) -> Option<String> {
    match message {
        ServerMessage::Welcome { .. } => debug!("server: ignoring repeated welcome"),
        ServerMessage::RegionEntered { pos, chunk } => {
            link.regions.insert(pos, chunk);
        }
        ServerMessage::RegionExited(pos) => {
            link.regions.remove(&pos);
        }
        ServerMessage::EntityCreated(record) | ServerMessage::EntityUpdated(record) => {
            if let Err(e) = mirror_entity(link, &record, store) {
                warn!("server: could not mirror {}: {e}", record.id);
            }
        }
        ServerMessage::EntityRemoved(remote) => {
            if let Some(local) = link.unmap(remote) {
                if let Err(e) = store.destroy(local) {
                    debug!("server: mirror of {remote} already gone: {e}");
                }
            }
        }
        ServerMessage::Event {
            name,
            payload,
            target,
        } => {
            let Some(kind) = events.library().kind(&name) else {
                debug!("server: dropping unknown event {name}");
                return None;
            };
            let target = match target {
                Target::Entity(e) => Target::Entity(link.local_of(e)),
                Target::Broadcast => Target::Broadcast,
            };
            let payload = payload.remap_entities(&mut |e| link.local_of(e));
            if let Err(e) = events.publish(Event::new(kind, payload), target) {
                warn!("server: could not publish {name}: {e}");
            }
        }
        ServerMessage::MutationConfirmed { request, .. } => {
            match link.pending.remove(&request) {
                // Spawned entities arrive through replication.
                Some(Mutation::Spawn { .. }) | None => {}
                Some(mutation) => {
                    if let Err(e) = mutation.apply(store) {
                        debug!("server: confirmed request {request} no longer applies: {e}");
                    }
                }
            }
        }
        ServerMessage::MutationRejected { request, reason } => {
            link.pending.remove(&request);
            warn!("server rejected request {request}: {reason}");
            notifications.push(NetworkNotification::MutationRejected { request, reason });
        }
        ServerMessage::Disconnect { reason } => return Some(reason),
    }
    None
}

fn mirror_entity(
    link: &mut ServerLink,
    record: &EntityRecord,
    store: &mut EntityManager,
) -> Result<()> {
    let mut local = link.local_of(record.id);
    if !local.is_null() && !store.is_alive(local) {
        link.unmap(record.id);
        local = EntityId::null();
    }
    if local.is_null() {
        local = store.create();
        link.map(record.id, local);
    }

    let library = store.library().clone();
    let mut present = Vec::with_capacity(record.components.len());
    for (name, value) in &record.components {
        let Some(kind) = library.kind(name) else {
            debug!("server: skipping unknown component {name}");
            continue;
        };
        present.push(kind);
        let value = value.remap_entities(&mut |e| link.local_of(e));
        store.attach(local, kind, value)?;
    }

    let stale: Vec<ComponentKind> = store
        .components_of(local)?
        .iter()
        .copied()
        .filter(|k| library.is_replicated(*k) && !present.contains(k))
        .collect();
    for kind in stale {
        store.remove(local, kind)?;
    }
    Ok(())
}

fn lose_server(link: &mut ServerLink, reason: &str, notifications: &mut Vec<NetworkNotification>) {
    warn!("lost connection to {}: {reason}", link.info.name);
    link.lost = true;
    link.pending.clear();
    link.connection.close();
    notifications.push(NetworkNotification::ServerLost {
        reason: reason.to_string(),
    });
}

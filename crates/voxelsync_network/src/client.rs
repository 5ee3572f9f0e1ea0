//! The client contract and its two implementations.
//!
//! [`LocalClient`] is the player sitting at this process. [`NetClient`] is the
//! authority's proxy for a remote participant; it accumulates what changed in
//! its observer's view and sends it on net ticks.

use std::collections::BTreeSet;

use log::{debug, trace};
use voxelsync_engine::{Chunk, Event, RegionTracker, SpatialIndex, Target, ViewDistance};
use voxelsync_foundation::{ClientId, EntityId, Error, RegionPos, Result};
use voxelsync_storage::{EventLibrary, StoreSnapshot};

use crate::mode::Color;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::ServerConnection;

// =============================================================================
// Contract
// =============================================================================

/// Receives region visibility changes for one observer.
pub trait RegionListener {
    /// A region became visible. `chunk` is its data if loaded.
    fn on_region_entered(&mut self, pos: RegionPos, chunk: Option<&Chunk>);

    /// A region is no longer visible.
    fn on_region_exited(&mut self, pos: RegionPos);
}

/// What a client reads while building its outbound delta.
pub struct ReplicationView<'a> {
    /// The store as of the end of this tick's systems.
    pub snapshot: &'a StoreSnapshot,
    /// Event names.
    pub events: &'a EventLibrary,
    /// Region observers.
    pub tracker: &'a RegionTracker,
    /// Entity regions.
    pub index: &'a SpatialIndex,
}

/// One participant in the session.
pub trait Client: RegionListener {
    /// Display name.
    fn name(&self) -> &str;

    /// Stable id.
    fn id(&self) -> ClientId;

    /// Display color.
    fn color(&self) -> Color;

    /// Ends the session. Pending sends are discarded.
    fn disconnect(&mut self);

    /// Called once per tick. On net ticks the accumulated delta is sent.
    fn update(&mut self, net_tick: bool, view: &ReplicationView<'_>);

    /// The player entity.
    fn entity(&self) -> EntityId;

    /// Queues an event for this participant.
    fn send(&mut self, event: &Event, target: Target);

    /// Current view distance.
    fn view_distance(&self) -> ViewDistance;

    /// Returns true for the player at this process.
    fn is_local(&self) -> bool;

    /// Records a new view distance. The coordinator recomputes regions.
    fn set_view_distance_mode(&mut self, distance: ViewDistance);
}

// =============================================================================
// Local Client
// =============================================================================

/// The player at this process.
#[derive(Debug)]
pub struct LocalClient {
    name: String,
    color: Color,
    entity: EntityId,
    view_distance: ViewDistance,
    visible: BTreeSet<RegionPos>,
    inbox: Vec<(Event, Target)>,
    connected: bool,
}

impl LocalClient {
    /// Creates the local player bound to `entity`.
    #[must_use]
    pub fn new(name: impl Into<String>, entity: EntityId) -> Self {
        Self {
            name: name.into(),
            color: Color::WHITE,
            entity,
            view_distance: ViewDistance::default(),
            visible: BTreeSet::new(),
            inbox: Vec::new(),
            connected: true,
        }
    }

    /// Sets the display color.
    #[must_use]
    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    /// Sets the initial view distance.
    #[must_use]
    pub fn with_view_distance(mut self, distance: ViewDistance) -> Self {
        self.view_distance = distance;
        self
    }

    /// Regions currently visible to the local player.
    #[must_use]
    pub fn visible_regions(&self) -> &BTreeSet<RegionPos> {
        &self.visible
    }

    /// Takes events queued with [`Client::send`].
    pub fn take_events(&mut self) -> Vec<(Event, Target)> {
        std::mem::take(&mut self.inbox)
    }

    /// Returns false after [`Client::disconnect`].
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl RegionListener for LocalClient {
    fn on_region_entered(&mut self, pos: RegionPos, _chunk: Option<&Chunk>) {
        self.visible.insert(pos);
    }

    fn on_region_exited(&mut self, pos: RegionPos) {
        self.visible.remove(&pos);
    }
}

impl Client for LocalClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> ClientId {
        ClientId::LOCAL
    }

    fn color(&self) -> Color {
        self.color
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.inbox.clear();
        self.visible.clear();
    }

    fn update(&mut self, _net_tick: bool, _view: &ReplicationView<'_>) {}

    fn entity(&self) -> EntityId {
        self.entity
    }

    fn send(&mut self, event: &Event, target: Target) {
        if self.connected {
            self.inbox.push((event.clone(), target));
        }
    }

    fn view_distance(&self) -> ViewDistance {
        self.view_distance
    }

    fn is_local(&self) -> bool {
        true
    }

    fn set_view_distance_mode(&mut self, distance: ViewDistance) {
        self.view_distance = distance;
    }
}

// =============================================================================
// Remote Proxy
// =============================================================================

/// Lifecycle of a remote proxy. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProxyState {
    /// Connected, handshake not finished.
    Connecting,
    /// Joined; included in replication.
    Active,
    /// Leaving; awaiting release by the coordinator.
    Disconnecting,
    /// Released. Terminal.
    Closed,
}

impl ProxyState {
    fn can_become(self, next: ProxyState) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Active | Self::Disconnecting)
                | (Self::Active, Self::Disconnecting)
                | (Self::Disconnecting, Self::Closed)
        )
    }
}

#[derive(Debug, Default)]
struct PendingDelta {
    regions: Vec<ServerMessage>,
    touched: BTreeSet<EntityId>,
    events: Vec<(Event, Target)>,
}

impl PendingDelta {
    fn is_empty(&self) -> bool {
        self.regions.is_empty() && self.touched.is_empty() && self.events.is_empty()
    }

    fn clear(&mut self) {
        self.regions.clear();
        self.touched.clear();
        self.events.clear();
    }
}

/// The authority's proxy for a remote participant.
#[derive(Debug)]
pub struct NetClient {
    id: ClientId,
    name: String,
    color: Color,
    entity: EntityId,
    view_distance: ViewDistance,
    state: ProxyState,
    connection: ServerConnection,
    known: BTreeSet<EntityId>,
    pending: PendingDelta,
}

impl NetClient {
    /// Wraps a freshly accepted connection.
    #[must_use]
    pub fn new(id: ClientId, connection: ServerConnection) -> Self {
        Self {
            id,
            name: String::new(),
            color: Color::WHITE,
            entity: EntityId::null(),
            view_distance: ViewDistance::default(),
            state: ProxyState::Connecting,
            connection,
            known: BTreeSet::new(),
            pending: PendingDelta::default(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ProxyState {
        self.state
    }

    /// Returns true while the proxy takes part in replication.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == ProxyState::Active
    }

    /// Completes the handshake.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the proxy is connecting.
    pub fn activate(
        &mut self,
        name: String,
        color: Color,
        view_distance: ViewDistance,
        entity: EntityId,
    ) -> Result<()> {
        self.transition(ProxyState::Active)?;
        self.name = name;
        self.color = color;
        self.view_distance = view_distance;
        self.entity = entity;
        Ok(())
    }

    /// Takes the next inbound message.
    ///
    /// # Errors
    ///
    /// Returns `Network` if the connection was lost.
    pub fn poll(&self) -> Result<Option<ClientMessage>> {
        self.connection.try_recv()
    }

    /// Sends a message now, bypassing the accumulator.
    ///
    /// A failed send starts disconnecting the proxy.
    pub fn send_now(&mut self, message: ServerMessage) {
        if self.connection.send(message).is_err() {
            self.disconnect();
        }
    }

    /// Marks an entity for evaluation on the next net tick.
    pub fn touch(&mut self, entity: EntityId) {
        if self.is_active() {
            self.pending.touched.insert(entity);
        }
    }

    /// Marks every entity this client currently knows.
    pub fn touch_known(&mut self) {
        if self.is_active() {
            self.pending.touched.extend(self.known.iter().copied());
        }
    }

    /// Returns true if the client was told about the entity and not told it left.
    #[must_use]
    pub fn knows(&self, entity: EntityId) -> bool {
        self.known.contains(&entity)
    }

    /// Number of entities the client knows.
    #[must_use]
    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    /// Returns true if nothing is waiting for the next net tick.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Releases the connection. Only valid while disconnecting.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` from any other state.
    pub fn close(&mut self) -> Result<()> {
        self.transition(ProxyState::Closed)?;
        self.connection.close();
        self.known.clear();
        Ok(())
    }

    fn transition(&mut self, next: ProxyState) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(Error::invalid_transition(self.state, next));
        }
        trace!("{}: {:?} -> {next:?}", self.id, self.state);
        self.state = next;
        Ok(())
    }

    fn entity_message(&mut self, entity: EntityId, view: &ReplicationView<'_>) -> Option<ServerMessage> {
        let visible = entity == self.entity
            || view
                .index
                .region_of(entity)
                .is_some_and(|r| view.tracker.can_see(self.id, r));
        let library = view.snapshot.library();
        let record = visible
            .then(|| view.snapshot.record(entity, |k| library.is_replicated(k)))
            .flatten();

        match record {
            Some(record) if self.known.insert(entity) => Some(ServerMessage::EntityCreated(record)),
            Some(record) => Some(ServerMessage::EntityUpdated(record)),
            None if self.known.remove(&entity) => Some(ServerMessage::EntityRemoved(entity)),
            None => None,
        }
    }
}

impl RegionListener for NetClient {
    fn on_region_entered(&mut self, pos: RegionPos, chunk: Option<&Chunk>) {
        if self.is_active() {
            self.pending.regions.push(ServerMessage::RegionEntered {
                pos,
                chunk: chunk.cloned(),
            });
        }
    }

    fn on_region_exited(&mut self, pos: RegionPos) {
        if self.is_active() {
            self.pending.regions.push(ServerMessage::RegionExited(pos));
        }
    }
}

impl Client for NetClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> ClientId {
        self.id
    }

    fn color(&self) -> Color {
        self.color
    }

    fn disconnect(&mut self) {
        if self.transition(ProxyState::Disconnecting).is_ok() {
            self.pending.clear();
            debug!("{} ({}) disconnecting", self.id, self.name);
        }
    }

    fn update(&mut self, net_tick: bool, view: &ReplicationView<'_>) {
        if !net_tick || !self.is_active() || self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        let mut out = pending.regions;

        for entity in pending.touched {
            if let Some(message) = self.entity_message(entity, view) {
                out.push(message);
            }
        }
        for (event, target) in pending.events {
            if let Some(name) = view.events.name(event.kind) {
                out.push(ServerMessage::Event {
                    name: name.to_string(),
                    payload: event.payload,
                    target,
                });
            }
        }

        trace!("{}: sending {} messages", self.id, out.len());
        for message in out {
            if self.connection.send(message).is_err() {
                self.disconnect();
                return;
            }
        }
    }

    fn entity(&self) -> EntityId {
        self.entity
    }

    fn send(&mut self, event: &Event, target: Target) {
        if self.is_active() {
            self.pending.events.push((event.clone(), target));
        }
    }

    fn view_distance(&self) -> ViewDistance {
        self.view_distance
    }

    fn is_local(&self) -> bool {
        false
    }

    fn set_view_distance_mode(&mut self, distance: ViewDistance) {
        self.view_distance = distance;
    }
}

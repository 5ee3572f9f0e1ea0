//! Events and their delivery targets.

use voxelsync_foundation::{EntityId, EventKind, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An immutable typed message.
///
/// Events have no identity; they are dispatched within the tick they were
/// published in (or forwarded to the network) and then dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Registered kind.
    pub kind: EventKind,
    /// Event data.
    pub payload: Value,
    /// Entity that caused the event, if any.
    pub origin: Option<EntityId>,
}

impl Event {
    /// Creates an event with no origin.
    #[must_use]
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            origin: None,
        }
    }

    /// Sets the originating entity.
    #[must_use]
    pub fn from_entity(mut self, origin: EntityId) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Who an event is addressed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Target {
    /// A single entity. Dropped if the entity is dead at dispatch time.
    Entity(EntityId),
    /// Every subscriber of the kind.
    Broadcast,
}

impl Target {
    /// The targeted entity, if any.
    #[must_use]
    pub const fn entity(self) -> Option<EntityId> {
        match self {
            Self::Entity(e) => Some(e),
            Self::Broadcast => None,
        }
    }
}

/// An event paired with its target, as queued for dispatch or replication.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// The event.
    pub event: Event,
    /// Its target.
    pub target: Target,
}

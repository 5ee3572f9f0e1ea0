//! Registries of component and event kinds.
//!
//! A content set registers its kinds once when it is loaded. Registration hands
//! out dense ids and records the metadata replication and persistence need.
//! Names are the stable identity: saves and wire messages use names, ids are
//! only meaningful inside the process that built the library.

use std::collections::HashMap;
use std::sync::Arc;

use voxelsync_foundation::{ComponentKind, Error, EventKind, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Registration request for a component kind.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ComponentDef {
    /// Unique kind name, e.g. `"core:health"`.
    pub name: String,
    /// Sent to observers that can see the owning entity.
    pub replicated: bool,
    /// Written to saves.
    pub persisted: bool,
}

impl ComponentDef {
    /// A replicated, persisted component.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replicated: true,
            persisted: true,
        }
    }

    /// Never leaves the authority.
    #[must_use]
    pub fn local_only(mut self) -> Self {
        self.replicated = false;
        self
    }

    /// Not written to saves.
    #[must_use]
    pub fn transient(mut self) -> Self {
        self.persisted = false;
        self
    }
}

/// Metadata of a registered component kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentInfo {
    /// Assigned id.
    pub kind: ComponentKind,
    /// Unique kind name.
    pub name: Arc<str>,
    /// Sent to observers.
    pub replicated: bool,
    /// Written to saves.
    pub persisted: bool,
}

/// Registry of component kinds for one content set.
#[derive(Clone, Debug, Default)]
pub struct ComponentLibrary {
    infos: Vec<ComponentInfo>,
    by_name: HashMap<Arc<str>, ComponentKind>,
}

impl ComponentLibrary {
    /// Creates an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component kind.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKind` if the name is already registered.
    #[allow(clippy::cast_possible_truncation)]
    pub fn register(&mut self, def: ComponentDef) -> Result<ComponentKind> {
        if self.by_name.contains_key(def.name.as_str()) {
            return Err(Error::duplicate_kind(def.name));
        }
        let kind = ComponentKind::from_index(self.infos.len() as u32);
        let name: Arc<str> = def.name.into();
        self.by_name.insert(Arc::clone(&name), kind);
        self.infos.push(ComponentInfo {
            kind,
            name,
            replicated: def.replicated,
            persisted: def.persisted,
        });
        Ok(kind)
    }

    /// Looks up a kind by name.
    #[must_use]
    pub fn kind(&self, name: &str) -> Option<ComponentKind> {
        self.by_name.get(name).copied()
    }

    /// Looks up a kind by name, failing if it is not registered.
    ///
    /// # Errors
    ///
    /// Returns `UnknownComponent` for unregistered names.
    pub fn resolve(&self, name: &str) -> Result<ComponentKind> {
        self.kind(name).ok_or_else(|| Error::unknown_component(name))
    }

    /// Returns the metadata of a kind.
    #[must_use]
    pub fn info(&self, kind: ComponentKind) -> Option<&ComponentInfo> {
        self.infos.get(kind.index() as usize)
    }

    /// Returns the name of a kind.
    #[must_use]
    pub fn name(&self, kind: ComponentKind) -> Option<&str> {
        self.info(kind).map(|info| &*info.name)
    }

    /// Returns true if the kind was handed out by this library.
    #[must_use]
    pub fn contains(&self, kind: ComponentKind) -> bool {
        (kind.index() as usize) < self.infos.len()
    }

    /// Returns true if the kind is replicated.
    #[must_use]
    pub fn is_replicated(&self, kind: ComponentKind) -> bool {
        self.info(kind).is_some_and(|info| info.replicated)
    }

    /// Returns true if the kind is persisted.
    #[must_use]
    pub fn is_persisted(&self, kind: ComponentKind) -> bool {
        self.info(kind).is_some_and(|info| info.persisted)
    }

    /// Iterates registered kinds in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

/// Registration request for an event kind.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventDef {
    /// Unique kind name.
    pub name: String,
    /// Forwarded to observers on the next network flush.
    pub replicable: bool,
    /// Sent by clients to the authority rather than the other way round.
    pub server_event: bool,
}

impl EventDef {
    /// A local-only event.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replicable: false,
            server_event: false,
        }
    }

    /// Marks the event as replicated to observers.
    #[must_use]
    pub fn replicable(mut self) -> Self {
        self.replicable = true;
        self
    }

    /// Marks the event as sent from clients to the authority.
    #[must_use]
    pub fn server_event(mut self) -> Self {
        self.server_event = true;
        self
    }
}

/// Metadata of a registered event kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventInfo {
    /// Assigned id.
    pub kind: EventKind,
    /// Unique kind name.
    pub name: Arc<str>,
    /// Forwarded to observers.
    pub replicable: bool,
    /// Client to authority.
    pub server_event: bool,
}

/// Registry of event kinds for one content set.
#[derive(Clone, Debug, Default)]
pub struct EventLibrary {
    infos: Vec<EventInfo>,
    by_name: HashMap<Arc<str>, EventKind>,
}

impl EventLibrary {
    /// Creates an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an event kind.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKind` if the name is already registered.
    #[allow(clippy::cast_possible_truncation)]
    pub fn register(&mut self, def: EventDef) -> Result<EventKind> {
        if self.by_name.contains_key(def.name.as_str()) {
            return Err(Error::duplicate_kind(def.name));
        }
        let kind = EventKind::from_index(self.infos.len() as u32);
        let name: Arc<str> = def.name.into();
        self.by_name.insert(Arc::clone(&name), kind);
        self.infos.push(EventInfo {
            kind,
            name,
            replicable: def.replicable,
            server_event: def.server_event,
        });
        Ok(kind)
    }

    /// Looks up a kind by name.
    #[must_use]
    pub fn kind(&self, name: &str) -> Option<EventKind> {
        self.by_name.get(name).copied()
    }

    /// Looks up a kind by name, failing if it is not registered.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEvent` for unregistered names.
    pub fn resolve(&self, name: &str) -> Result<EventKind> {
        self.kind(name).ok_or_else(|| Error::unknown_event(name))
    }

    /// Returns the metadata of a kind.
    #[must_use]
    pub fn info(&self, kind: EventKind) -> Option<&EventInfo> {
        self.infos.get(kind.index() as usize)
    }

    /// Returns the name of a kind.
    #[must_use]
    pub fn name(&self, kind: EventKind) -> Option<&str> {
        self.info(kind).map(|info| &*info.name)
    }

    /// Returns true if the kind is forwarded to observers.
    #[must_use]
    pub fn is_replicable(&self, kind: EventKind) -> bool {
        self.info(kind).is_some_and(|info| info.replicable)
    }

    /// Iterates registered kinds in id order.
    pub fn iter(&self) -> impl Iterator<Item = &EventInfo> {
        self.infos.iter()
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

/// Component and event libraries of one loaded content set.
#[derive(Clone, Debug, Default)]
pub struct EntitySystemLibrary {
    /// Component kinds.
    pub components: Arc<ComponentLibrary>,
    /// Event kinds.
    pub events: Arc<EventLibrary>,
}

impl EntitySystemLibrary {
    /// Bundles finished libraries.
    #[must_use]
    pub fn new(components: ComponentLibrary, events: EventLibrary) -> Self {
        Self {
            components: Arc::new(components),
            events: Arc::new(events),
        }
    }
}

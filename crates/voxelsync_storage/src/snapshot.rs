//! Point-in-time views of the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use voxelsync_foundation::{ComponentKind, EntityId, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::component::ComponentStore;
use crate::entity::EntityStore;
use crate::library::ComponentLibrary;

/// Registry-independent form of one entity, keyed by component name.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityRecord {
    /// Handle the entity had in the store that produced the record.
    pub id: EntityId,
    /// Component values by kind name.
    pub components: BTreeMap<String, Value>,
}

impl EntityRecord {
    /// Creates a record with no components.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            components: BTreeMap::new(),
        }
    }

    /// Adds a component.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.components.insert(name.into(), value);
        self
    }
}

/// Immutable view of the store at the moment it was taken.
///
/// Taking a snapshot only bumps reference counts. Later writes to the store copy
/// the parts they touch, so the snapshot never observes them and can be read
/// from another thread while the simulation keeps running.
#[derive(Clone, Debug)]
pub struct StoreSnapshot {
    pub(crate) entities: Arc<EntityStore>,
    pub(crate) components: Arc<ComponentStore>,
    pub(crate) library: Arc<ComponentLibrary>,
    pub(crate) seq: u64,
}

impl StoreSnapshot {
    /// Journal sequence number at the time of the snapshot.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Iterates live entities.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter()
    }

    /// Returns true if the entity was alive.
    #[must_use]
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_alive(entity)
    }

    /// Reads a component.
    #[must_use]
    pub fn get(&self, entity: EntityId, kind: ComponentKind) -> Option<&Value> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        self.components.get(entity, kind)
    }

    /// Kinds attached to an entity.
    #[must_use]
    pub fn components_of(&self, entity: EntityId) -> &[ComponentKind] {
        self.components.kinds_of(entity)
    }

    /// Library the snapshot's kind ids belong to.
    #[must_use]
    pub fn library(&self) -> &Arc<ComponentLibrary> {
        &self.library
    }

    /// Converts every live entity to a record, keeping persisted components only.
    #[must_use]
    pub fn to_records(&self) -> Vec<EntityRecord> {
        self.entities
            .iter()
            .map(|id| self.record_of(id, |kind| self.library.is_persisted(kind)))
            .collect()
    }

    /// Converts one entity to a record, keeping components accepted by `keep`.
    ///
    /// Returns `None` if the entity was not alive.
    #[must_use]
    pub fn record(
        &self,
        entity: EntityId,
        keep: impl Fn(ComponentKind) -> bool,
    ) -> Option<EntityRecord> {
        self.is_alive(entity)
            .then(|| self.record_of(entity, keep))
    }

    fn record_of(&self, entity: EntityId, keep: impl Fn(ComponentKind) -> bool) -> EntityRecord {
        let mut record = EntityRecord::new(entity);
        for &kind in self.components.kinds_of(entity) {
            if !keep(kind) {
                continue;
            }
            if let (Some(name), Some(value)) =
                (self.library.name(kind), self.components.get(entity, kind))
            {
                record.components.insert(name.to_string(), value.clone());
            }
        }
        record
    }
}

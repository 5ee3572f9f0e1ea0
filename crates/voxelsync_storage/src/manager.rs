//! The entity manager: the authoritative entity/component store.
//!
//! All simulation state lives here and is mutated only from the main loop.
//! Every operation validates the entity handle first, so a stale handle always
//! surfaces as an error instead of touching whatever reuses the slot.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace};
use voxelsync_foundation::{ComponentKind, EntityId, Error, Result, Value};

use crate::component::ComponentStore;
use crate::entity::EntityStore;
use crate::journal::{ChangeJournal, ChangeKind, StoreChange};
use crate::library::ComponentLibrary;
use crate::snapshot::{EntityRecord, StoreSnapshot};

/// Owns every entity and its component data.
///
/// Entity and component storage sit behind `Arc`s over persistent collections,
/// so [`EntityManager::snapshot`] is O(1) and writes after a snapshot copy only
/// the parts they touch.
#[derive(Debug)]
pub struct EntityManager {
    entities: Arc<EntityStore>,
    components: Arc<ComponentStore>,
    library: Arc<ComponentLibrary>,
    journal: ChangeJournal,
}

impl EntityManager {
    /// Creates an empty store for the given component library.
    #[must_use]
    pub fn new(library: Arc<ComponentLibrary>) -> Self {
        Self {
            entities: Arc::new(EntityStore::new()),
            components: Arc::new(ComponentStore::new()),
            library,
            journal: ChangeJournal::new(),
        }
    }

    /// The component library this store was built for.
    #[must_use]
    pub fn library(&self) -> &Arc<ComponentLibrary> {
        &self.library
    }

    // --- Entity Operations ---

    /// Creates an entity with no components.
    pub fn create(&mut self) -> EntityId {
        let id = Arc::make_mut(&mut self.entities).create();
        self.journal.record(ChangeKind::Created(id));
        trace!("created {id:?}");
        id
    }

    /// Creates an entity with initial components.
    ///
    /// # Errors
    ///
    /// Returns `UnknownComponent` if any kind is not in the library; nothing is
    /// created in that case.
    pub fn create_with(
        &mut self,
        components: impl IntoIterator<Item = (ComponentKind, Value)>,
    ) -> Result<EntityId> {
        let components: Vec<_> = components.into_iter().collect();
        for (kind, _) in &components {
            self.check_kind(*kind)?;
        }

        let id = self.create();
        for (kind, value) in components {
            self.attach(id, kind, value)?;
        }
        Ok(id)
    }

    /// Destroys an entity and all of its components.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` or `EntityNotFound` for a dead handle.
    pub fn destroy(&mut self, entity: EntityId) -> Result<()> {
        self.entities.validate(entity)?;

        Arc::make_mut(&mut self.components).remove_entity(entity);
        Arc::make_mut(&mut self.entities).destroy(entity)?;
        self.journal.record(ChangeKind::Destroyed(entity));
        trace!("destroyed {entity:?}");
        Ok(())
    }

    /// Returns true if the handle refers to a live entity.
    #[must_use]
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_alive(entity)
    }

    /// Validates a handle.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` or `EntityNotFound` for a dead handle.
    pub fn validate(&self, entity: EntityId) -> Result<()> {
        self.entities.validate(entity)
    }

    /// Iterates live entities in index order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter()
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    // --- Component Operations ---

    /// Attaches or replaces a component, returning the previous value.
    ///
    /// # Errors
    ///
    /// Fails for a dead handle or an unregistered kind.
    pub fn attach(
        &mut self,
        entity: EntityId,
        kind: ComponentKind,
        value: Value,
    ) -> Result<Option<Value>> {
        self.entities.validate(entity)?;
        self.check_kind(kind)?;

        let previous = Arc::make_mut(&mut self.components).set(entity, kind, value);
        let change = if previous.is_some() {
            ChangeKind::Changed(entity, kind)
        } else {
            ChangeKind::Attached(entity, kind)
        };
        self.journal.record(change);
        Ok(previous)
    }

    /// Reads a component.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` or `EntityNotFound` for a dead handle.
    pub fn get(&self, entity: EntityId, kind: ComponentKind) -> Result<Option<&Value>> {
        self.entities.validate(entity)?;
        Ok(self.components.get(entity, kind))
    }

    /// Removes a component, returning it if it was attached.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` or `EntityNotFound` for a dead handle.
    pub fn remove(&mut self, entity: EntityId, kind: ComponentKind) -> Result<Option<Value>> {
        self.entities.validate(entity)?;

        let removed = Arc::make_mut(&mut self.components).remove(entity, kind);
        if removed.is_some() {
            self.journal.record(ChangeKind::Removed(entity, kind));
        }
        Ok(removed)
    }

    /// Updates a component in place.
    ///
    /// # Errors
    ///
    /// Fails for a dead handle, or with `ComponentNotFound` if the component is
    /// not attached.
    pub fn modify(
        &mut self,
        entity: EntityId,
        kind: ComponentKind,
        f: impl FnOnce(&mut Value),
    ) -> Result<()> {
        self.entities.validate(entity)?;

        if !self.components.has(entity, kind) {
            return Err(Error::component_not_found(entity, self.kind_name(kind)));
        }
        if let Some(value) = Arc::make_mut(&mut self.components).get_mut(entity, kind) {
            f(value);
        }
        self.journal.record(ChangeKind::Changed(entity, kind));
        Ok(())
    }

    /// Checks whether a component is attached.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` or `EntityNotFound` for a dead handle.
    pub fn has(&self, entity: EntityId, kind: ComponentKind) -> Result<bool> {
        self.entities.validate(entity)?;
        Ok(self.components.has(entity, kind))
    }

    /// Kinds attached to an entity, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns `StaleEntity` or `EntityNotFound` for a dead handle.
    pub fn components_of(&self, entity: EntityId) -> Result<&[ComponentKind]> {
        self.entities.validate(entity)?;
        Ok(self.components.kinds_of(entity))
    }

    /// Iterates entities carrying a component.
    pub fn with_component(&self, kind: ComponentKind) -> impl Iterator<Item = EntityId> + '_ {
        self.components.with_component(kind)
    }

    // --- Whole-store Operations ---

    /// Destroys every entity.
    ///
    /// Handles issued before the clear stay stale. The journal is truncated
    /// without recording the destructions.
    pub fn clear(&mut self) {
        let count = self.entities.len();
        Arc::make_mut(&mut self.components).clear();
        Arc::make_mut(&mut self.entities).clear();
        self.journal.take();
        debug!("cleared entity store ({count} entities)");
    }

    /// Takes an O(1) immutable snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            entities: Arc::clone(&self.entities),
            components: Arc::clone(&self.components),
            library: Arc::clone(&self.library),
            seq: self.journal.last_seq(),
        }
    }

    /// Loads records produced by [`StoreSnapshot::to_records`].
    ///
    /// Entities get fresh handles; every `EntityRef` inside component values is
    /// rewritten to the new handles, and references to entities missing from
    /// `records` become null. Returns the old-to-new handle map.
    ///
    /// # Errors
    ///
    /// Returns `UnknownComponent` if a record names a kind missing from the
    /// library; nothing is loaded in that case.
    pub fn restore(&mut self, records: &[EntityRecord]) -> Result<HashMap<EntityId, EntityId>> {
        let mut resolved = Vec::with_capacity(records.len());
        for record in records {
            let kinds = record
                .components
                .keys()
                .map(|name| self.library.resolve(name))
                .collect::<Result<Vec<_>>>()?;
            resolved.push(kinds);
        }

        let ids: HashMap<EntityId, EntityId> = records
            .iter()
            .map(|record| (record.id, self.create()))
            .collect();

        let mut remap = |old: EntityId| ids.get(&old).copied().unwrap_or_else(EntityId::null);
        for (record, kinds) in records.iter().zip(resolved) {
            let id = remap(record.id);
            for (kind, value) in kinds.into_iter().zip(record.components.values()) {
                self.attach(id, kind, value.remap_entities(&mut remap))?;
            }
        }

        debug!("restored {} entities", ids.len());
        Ok(ids)
    }

    // --- Change Journal ---

    /// Changes recorded after `seq` and not yet truncated.
    #[must_use]
    pub fn changes_since(&self, seq: u64) -> &[StoreChange] {
        self.journal.since(seq)
    }

    /// Sequence number of the newest change.
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.journal.last_seq()
    }

    /// Removes and returns all retained changes.
    pub fn take_changes(&mut self) -> Vec<StoreChange> {
        self.journal.take()
    }

    /// Drops changes every reader has seen, i.e. up to and including `seq`.
    pub fn discard_changes_through(&mut self, seq: u64) {
        let dropped = self.journal.discard_through(seq);
        if dropped > 0 {
            trace!("discarded {dropped} journal entries through {seq}");
        }
    }

    // --- Private helpers ---

    fn check_kind(&self, kind: ComponentKind) -> Result<()> {
        if self.library.contains(kind) {
            Ok(())
        } else {
            Err(Error::unknown_component(format!("{kind:?}")))
        }
    }

    fn kind_name(&self, kind: ComponentKind) -> String {
        self.library
            .name(kind)
            .map_or_else(|| format!("{kind:?}"), str::to_string)
    }
}

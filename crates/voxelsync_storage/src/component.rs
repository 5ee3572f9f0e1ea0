//! Component storage keyed by kind, then by entity.
//!
//! Both levels are persistent maps so the whole store clones in O(1); a save
//! snapshot shares structure with the live store until the next write.

use voxelsync_foundation::{ComponentKind, EntityId, Value};

/// Sorted list of the component kinds attached to one entity.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct KindSet {
    kinds: Vec<ComponentKind>,
}

impl KindSet {
    /// Returns the kinds in this set, sorted.
    #[must_use]
    pub fn kinds(&self) -> &[ComponentKind] {
        &self.kinds
    }

    /// Checks if this set contains a kind.
    #[must_use]
    pub fn contains(&self, kind: ComponentKind) -> bool {
        self.kinds.binary_search(&kind).is_ok()
    }

    fn insert(&mut self, kind: ComponentKind) {
        if let Err(pos) = self.kinds.binary_search(&kind) {
            self.kinds.insert(pos, kind);
        }
    }

    fn remove(&mut self, kind: ComponentKind) {
        if let Ok(pos) = self.kinds.binary_search(&kind) {
            self.kinds.remove(pos);
        }
    }
}

/// Stores all component data for entities.
///
/// Performs no liveness checks; the entity manager validates handles first.
#[derive(Clone, Debug, Default)]
pub struct ComponentStore {
    data: im::HashMap<ComponentKind, im::HashMap<EntityId, Value>>,
    kinds: im::HashMap<EntityId, KindSet>,
}

impl ComponentStore {
    /// Creates a new empty component store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a component on an entity, returning the previous value.
    pub fn set(&mut self, entity: EntityId, kind: ComponentKind, value: Value) -> Option<Value> {
        let previous = self
            .data
            .entry(kind)
            .or_insert_with(im::HashMap::new)
            .insert(entity, value);
        if previous.is_none() {
            self.kinds
                .entry(entity)
                .or_insert_with(KindSet::default)
                .insert(kind);
        }
        previous
    }

    /// Gets a component value for an entity.
    #[must_use]
    pub fn get(&self, entity: EntityId, kind: ComponentKind) -> Option<&Value> {
        self.data.get(&kind)?.get(&entity)
    }

    /// Gets a mutable component value. Only the touched map nodes are copied.
    pub fn get_mut(&mut self, entity: EntityId, kind: ComponentKind) -> Option<&mut Value> {
        self.data.get_mut(&kind)?.get_mut(&entity)
    }

    /// Checks if an entity has a component.
    #[must_use]
    pub fn has(&self, entity: EntityId, kind: ComponentKind) -> bool {
        self.data
            .get(&kind)
            .is_some_and(|m| m.contains_key(&entity))
    }

    /// Removes a component from an entity, returning it if it existed.
    pub fn remove(&mut self, entity: EntityId, kind: ComponentKind) -> Option<Value> {
        let value = self.data.get_mut(&kind)?.remove(&entity);

        if value.is_some() {
            if let Some(set) = self.kinds.get_mut(&entity) {
                set.remove(kind);
            }
        }

        value
    }

    /// Removes all components of an entity and returns the kinds it had.
    pub fn remove_entity(&mut self, entity: EntityId) -> Vec<ComponentKind> {
        let Some(set) = self.kinds.remove(&entity) else {
            return Vec::new();
        };
        for kind in set.kinds() {
            if let Some(by_entity) = self.data.get_mut(kind) {
                by_entity.remove(&entity);
            }
        }
        set.kinds
    }

    /// Returns the kinds attached to an entity, sorted.
    #[must_use]
    pub fn kinds_of(&self, entity: EntityId) -> &[ComponentKind] {
        self.kinds.get(&entity).map_or(&[][..], KindSet::kinds)
    }

    /// Iterates entities with a specific component.
    pub fn with_component(&self, kind: ComponentKind) -> impl Iterator<Item = EntityId> + '_ {
        self.data
            .get(&kind)
            .into_iter()
            .flat_map(|m| m.keys().copied())
    }

    /// Number of entities carrying a component.
    #[must_use]
    pub fn count(&self, kind: ComponentKind) -> usize {
        self.data.get(&kind).map_or(0, im::HashMap::len)
    }

    /// Drops every component.
    pub fn clear(&mut self) {
        self.data.clear();
        self.kinds.clear();
    }
}

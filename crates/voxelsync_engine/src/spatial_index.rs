//! Entity-to-region index built from the store's change journal.

use std::collections::{BTreeSet, HashMap};

use voxelsync_foundation::{ComponentKind, EntityId, RegionBox, RegionPos, RegionSize, Vec3};
use voxelsync_storage::{ChangeKind, EntityManager};

/// An entity that changed region (or appeared or disappeared) during a sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityMove {
    /// The entity.
    pub entity: EntityId,
    /// Region before the sync, if it was indexed.
    pub from: Option<RegionPos>,
    /// Region after the sync, if it is still indexed.
    pub to: Option<RegionPos>,
}

/// Region membership of every entity with a position component.
#[derive(Debug)]
pub struct SpatialIndex {
    position: ComponentKind,
    size: RegionSize,
    by_entity: HashMap<EntityId, RegionPos>,
    by_region: HashMap<RegionPos, BTreeSet<EntityId>>,
    cursor: u64,
}

impl SpatialIndex {
    /// Creates an empty index over the given position component.
    #[must_use]
    pub fn new(position: ComponentKind, size: RegionSize) -> Self {
        Self {
            position,
            size,
            by_entity: HashMap::new(),
            by_region: HashMap::new(),
            cursor: 0,
        }
    }

    /// The position component kind.
    #[must_use]
    pub fn position_kind(&self) -> ComponentKind {
        self.position
    }

    /// Applies store changes recorded since the previous sync.
    ///
    /// Returns entities whose region changed. An entity that moved within its
    /// region is not reported.
    pub fn sync(&mut self, store: &EntityManager) -> Vec<EntityMove> {
        let mut moved: HashMap<EntityId, Option<RegionPos>> = HashMap::new();

        for change in store.changes_since(self.cursor) {
            let entity = change.kind.entity();
            match change.kind {
                ChangeKind::Destroyed(_) => {
                    let before = self.by_entity.get(&entity).copied();
                    moved.entry(entity).or_insert(before);
                    self.unindex(entity);
                }
                ChangeKind::Attached(_, kind)
                | ChangeKind::Changed(_, kind)
                | ChangeKind::Removed(_, kind)
                    if kind == self.position =>
                {
                    let before = self.by_entity.get(&entity).copied();
                    moved.entry(entity).or_insert(before);
                    let region = store
                        .get(entity, kind)
                        .ok()
                        .flatten()
                        .and_then(Vec3::from_value)
                        .map(|p| self.size.region_of(p));
                    match region {
                        Some(region) => self.index(entity, region),
                        None => self.unindex(entity),
                    }
                }
                _ => {}
            }
        }
        self.cursor = store.last_seq();

        let mut moves: Vec<EntityMove> = moved
            .into_iter()
            .filter_map(|(entity, from)| {
                let to = self.by_entity.get(&entity).copied();
                (from != to).then_some(EntityMove { entity, from, to })
            })
            .collect();
        moves.sort_by_key(|m| m.entity);
        moves
    }

    /// Reindexes every entity from scratch.
    pub fn rebuild(&mut self, store: &EntityManager) {
        self.by_entity.clear();
        self.by_region.clear();
        let positioned: Vec<EntityId> = store.with_component(self.position).collect();
        for entity in positioned {
            if let Some(pos) = store
                .get(entity, self.position)
                .ok()
                .flatten()
                .and_then(Vec3::from_value)
            {
                self.index(entity, self.size.region_of(pos));
            }
        }
        self.cursor = store.last_seq();
    }

    /// Region of an entity.
    #[must_use]
    pub fn region_of(&self, entity: EntityId) -> Option<RegionPos> {
        self.by_entity.get(&entity).copied()
    }

    /// Entities in a region, in handle order.
    pub fn entities_in(&self, pos: RegionPos) -> impl Iterator<Item = EntityId> + '_ {
        self.by_region
            .get(&pos)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Entities in every region of a box.
    #[must_use]
    pub fn entities_in_box(&self, area: RegionBox) -> Vec<EntityId> {
        if area.len() > self.by_region.len() {
            self.by_region
                .iter()
                .filter(|(pos, _)| area.contains(**pos))
                .flat_map(|(_, set)| set.iter().copied())
                .collect()
        } else {
            area.iter().flat_map(|pos| self.entities_in(pos)).collect()
        }
    }

    /// Number of indexed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.by_entity.clear();
        self.by_region.clear();
    }

    fn index(&mut self, entity: EntityId, region: RegionPos) {
        if self.by_entity.get(&entity) == Some(&region) {
            return;
        }
        self.unindex(entity);
        self.by_entity.insert(entity, region);
        self.by_region.entry(region).or_default().insert(entity);
    }

    fn unindex(&mut self, entity: EntityId) {
        if let Some(old) = self.by_entity.remove(&entity) {
            if let Some(set) = self.by_region.get_mut(&old) {
                set.remove(&entity);
                if set.is_empty() {
                    self.by_region.remove(&old);
                }
            }
        }
    }
}

//! Entity lifecycle management with generational indices.
//!
//! The `EntityStore` hands out entity handles and tracks generations so that a
//! handle to a destroyed entity is detected instead of aliasing the slot's next
//! occupant.

// Allow u64 to usize casts - we target 64-bit systems
#![allow(clippy::cast_possible_truncation)]

use log::debug;
use voxelsync_foundation::{EntityId, Error, Result};

/// Generation of a slot whose generations ran out. It is never reused.
const RETIRED: u32 = 0;

/// Manages entity lifecycle and generation tracking.
///
/// Generations live in a persistent vector so that a store snapshot can share
/// them without copying. Even generations are free, odd generations are alive.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    generations: im::Vector<u32>,
    free_list: Vec<u64>,
    live_count: usize,
}

impl EntityStore {
    /// Creates a new empty entity store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new entity handle, reusing a freed slot when one exists.
    pub fn create(&mut self) -> EntityId {
        self.live_count += 1;

        // Free generations are even and below u32::MAX, so the bump cannot wrap.
        let reusable = self.free_list.pop().and_then(|index| {
            let generation = self.generations.get(index as usize)?.checked_add(1)?;
            Some((index, generation))
        });
        if let Some((index, generation)) = reusable {
            self.generations.set(index as usize, generation);
            EntityId::new(index, generation)
        } else {
            let index = self.generations.len() as u64;
            self.generations.push_back(1);
            EntityId::new(index, 1)
        }
    }

    /// Destroys an entity, retiring its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale or was never issued.
    pub fn destroy(&mut self, id: EntityId) -> Result<()> {
        self.validate(id)?;
        self.release(id);
        self.live_count -= 1;
        Ok(())
    }

    /// Destroys every live entity.
    ///
    /// Generations are bumped rather than reset, so handles issued before the
    /// clear stay stale forever.
    pub fn clear(&mut self) {
        let live: Vec<EntityId> = self.iter().collect();
        for id in live {
            self.release(id);
        }
        self.live_count = 0;
    }

    /// Returns true if the handle refers to a live entity.
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.generations
            .get(id.index as usize)
            .is_some_and(|generation| *generation == id.generation && generation % 2 == 1)
    }

    /// Validates that a handle refers to a live entity.
    ///
    /// # Errors
    ///
    /// `StaleEntity` if the slot was destroyed or reused since the handle was
    /// issued, `EntityNotFound` if the handle was never issued.
    pub fn validate(&self, id: EntityId) -> Result<()> {
        let Some(&current) = self.generations.get(id.index as usize) else {
            return Err(Error::entity_not_found(id));
        };

        if current != id.generation {
            return Err(Error::stale_entity(id));
        }

        if current % 2 == 0 {
            return Err(Error::entity_not_found(id));
        }

        Ok(())
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live_count
    }

    /// Returns true if there are no live entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Iterates over all live entity handles in index order.
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.generations
            .iter()
            .enumerate()
            .filter(|(_, generation)| *generation % 2 == 1)
            .map(|(idx, generation)| EntityId::new(idx as u64, *generation))
    }

    /// Returns the current generation for an index, if it exists.
    #[must_use]
    pub fn generation(&self, index: u64) -> Option<u32> {
        self.generations.get(index as usize).copied()
    }

    /// Frees the slot of a live `id`, or retires it once its generations run out.
    fn release(&mut self, id: EntityId) {
        let idx = id.index as usize;
        match id.generation.checked_add(1) {
            Some(next) => {
                self.generations.set(idx, next);
                self.free_list.push(id.index);
            }
            None => {
                debug!("retiring entity slot {}", id.index);
                self.generations.set(idx, RETIRED);
            }
        }
    }
}

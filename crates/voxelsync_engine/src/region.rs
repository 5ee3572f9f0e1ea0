//! Chunk region tracking.
//!
//! Maps regions to the clients observing them. Each observer covers an
//! inclusive box of regions around the region it stands in; moving only
//! touches the slabs that differ between the old and new box.

use std::collections::{BTreeSet, HashMap};

use log::trace;
use voxelsync_foundation::{ClientId, RegionBox, RegionPos, RegionSize, Vec3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Horizontal view radius, in regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ViewDistance(u32);

impl ViewDistance {
    /// Only the region the observer stands in.
    pub const LEGALLY_BLIND: ViewDistance = ViewDistance(0);
    /// Two regions.
    pub const NEAR: ViewDistance = ViewDistance(2);
    /// Four regions.
    pub const MODERATE: ViewDistance = ViewDistance(4);
    /// Eight regions.
    pub const FAR: ViewDistance = ViewDistance(8);
    /// Sixteen regions.
    pub const ULTRA: ViewDistance = ViewDistance(16);

    /// A custom radius.
    #[must_use]
    pub const fn new(radius: u32) -> Self {
        Self(radius)
    }

    /// Radius in regions.
    #[must_use]
    pub const fn radius(self) -> u32 {
        self.0
    }
}

impl Default for ViewDistance {
    fn default() -> Self {
        Self::MODERATE
    }
}

/// Region geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionConfig {
    /// Size of one region in blocks.
    pub size: RegionSize,
    /// Vertical view radius in regions, shared by all observers.
    pub vertical_radius: u32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            size: RegionSize::default(),
            vertical_radius: 1,
        }
    }
}

/// Regions gained and lost by one update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionDelta {
    /// Regions the observer can now see.
    pub entered: Vec<RegionPos>,
    /// Regions the observer can no longer see.
    pub exited: Vec<RegionPos>,
}

impl RegionDelta {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.exited.is_empty()
    }
}

#[derive(Clone, Debug)]
struct Observer {
    position: Vec3,
    distance: ViewDistance,
    area: RegionBox,
}

#[derive(Clone, Debug, Default)]
struct Region {
    observers: BTreeSet<ClientId>,
    pending_work: u32,
}

impl Region {
    fn is_idle(&self) -> bool {
        self.observers.is_empty() && self.pending_work == 0
    }
}

/// Tracks which clients observe which regions.
///
/// Regions are created the first time anything observes them or schedules
/// work in them, and evicted once both their observer set and their pending
/// work are empty. Evicted positions are collected for
/// [`RegionTracker::take_evicted`].
#[derive(Debug, Default)]
pub struct RegionTracker {
    config: RegionConfig,
    observers: HashMap<ClientId, Observer>,
    regions: HashMap<RegionPos, Region>,
    evicted: Vec<RegionPos>,
}

impl RegionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new(config: RegionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Region geometry.
    #[must_use]
    pub fn config(&self) -> RegionConfig {
        self.config
    }

    /// The box of regions visible from `position` at `distance`.
    #[must_use]
    pub fn visible_box(&self, position: Vec3, distance: ViewDistance) -> RegionBox {
        RegionBox::around(
            self.config.size.region_of(position),
            distance.radius(),
            self.config.vertical_radius,
        )
    }

    /// Moves an observer and returns the regions it entered and exited.
    ///
    /// Repeating a call with the same region and distance returns an empty
    /// delta. Distance is inclusive: a region exactly `distance` regions away is
    /// visible.
    pub fn update_observer_position(
        &mut self,
        client: ClientId,
        position: Vec3,
        distance: ViewDistance,
    ) -> RegionDelta {
        let area = self.visible_box(position, distance);
        let previous = self.observers.insert(
            client,
            Observer {
                position,
                distance,
                area,
            },
        );

        let mut delta = RegionDelta::default();
        match previous {
            Some(old) if old.area == area => {}
            Some(old) => {
                for part in area.difference(&old.area) {
                    self.enter_all(client, part, &mut delta.entered);
                }
                for part in old.area.difference(&area) {
                    self.exit_all(client, part, &mut delta.exited);
                }
            }
            None => self.enter_all(client, area, &mut delta.entered),
        }

        if !delta.is_empty() {
            trace!(
                "{client}: +{} -{} regions",
                delta.entered.len(),
                delta.exited.len()
            );
        }
        delta
    }

    /// Changes an observer's view distance in place.
    ///
    /// Returns `None` if the client is not observing.
    pub fn set_view_distance(
        &mut self,
        client: ClientId,
        distance: ViewDistance,
    ) -> Option<RegionDelta> {
        let position = self.observers.get(&client)?.position;
        Some(self.update_observer_position(client, position, distance))
    }

    /// Removes an observer and returns every region it was released from.
    pub fn remove_observer(&mut self, client: ClientId) -> Vec<RegionPos> {
        let mut exited = Vec::new();
        if let Some(observer) = self.observers.remove(&client) {
            self.exit_all(client, observer.area, &mut exited);
        }
        exited
    }

    /// Clients observing a region, in id order.
    pub fn observers_of(&self, pos: RegionPos) -> impl Iterator<Item = ClientId> + '_ {
        self.regions
            .get(&pos)
            .into_iter()
            .flat_map(|region| region.observers.iter().copied())
    }

    /// Returns true if any client observes the region.
    #[must_use]
    pub fn is_observed(&self, pos: RegionPos) -> bool {
        self.regions
            .get(&pos)
            .is_some_and(|region| !region.observers.is_empty())
    }

    /// The box of regions a client observes.
    #[must_use]
    pub fn regions_of(&self, client: ClientId) -> Option<RegionBox> {
        self.observers.get(&client).map(|o| o.area)
    }

    /// Returns true if the client observes the region.
    #[must_use]
    pub fn can_see(&self, client: ClientId, pos: RegionPos) -> bool {
        self.observers
            .get(&client)
            .is_some_and(|o| o.area.contains(pos))
    }

    /// Last reported position and distance of a client.
    #[must_use]
    pub fn observer(&self, client: ClientId) -> Option<(Vec3, ViewDistance)> {
        self.observers
            .get(&client)
            .map(|o| (o.position, o.distance))
    }

    /// Iterates observing clients.
    pub fn observer_ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.observers.keys().copied()
    }

    /// Number of regions currently materialized.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Records pending work in a region, creating it if needed.
    pub fn add_pending_work(&mut self, pos: RegionPos) {
        self.regions.entry(pos).or_default().pending_work += 1;
    }

    /// Completes one unit of pending work; the region may be evicted.
    pub fn complete_pending_work(&mut self, pos: RegionPos) {
        if let Some(region) = self.regions.get_mut(&pos) {
            region.pending_work = region.pending_work.saturating_sub(1);
            self.evict_if_idle(pos);
        }
    }

    /// Takes the positions of regions evicted since the last call.
    pub fn take_evicted(&mut self) -> Vec<RegionPos> {
        std::mem::take(&mut self.evicted)
    }

    /// Drops every observer and region without reporting evictions.
    pub fn clear(&mut self) {
        self.observers.clear();
        self.regions.clear();
        self.evicted.clear();
    }

    // --- Private helpers ---

    fn enter_all(&mut self, client: ClientId, part: RegionBox, out: &mut Vec<RegionPos>) {
        for pos in part.iter() {
            if self.regions.entry(pos).or_default().observers.insert(client) {
                out.push(pos);
            }
        }
    }

    fn exit_all(&mut self, client: ClientId, part: RegionBox, out: &mut Vec<RegionPos>) {
        for pos in part.iter() {
            let removed = self
                .regions
                .get_mut(&pos)
                .is_some_and(|region| region.observers.remove(&client));
            if removed {
                out.push(pos);
                self.evict_if_idle(pos);
            }
        }
    }

    fn evict_if_idle(&mut self, pos: RegionPos) {
        if self.regions.get(&pos).is_some_and(Region::is_idle) {
            self.regions.remove(&pos);
            self.evicted.push(pos);
        }
    }
}

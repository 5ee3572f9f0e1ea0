//! Change journal of structural store mutations.
//!
//! Replication and the spatial index read the journal instead of hooking the
//! store, so they see every create, destroy, attach, change and remove in order.

use voxelsync_foundation::{ComponentKind, EntityId};

/// What happened to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// Entity was created.
    Created(EntityId),
    /// Entity was destroyed, together with all its components.
    Destroyed(EntityId),
    /// Component was attached to an entity that did not have it.
    Attached(EntityId, ComponentKind),
    /// Existing component was replaced or modified.
    Changed(EntityId, ComponentKind),
    /// Component was removed.
    Removed(EntityId, ComponentKind),
}

impl ChangeKind {
    /// The entity the change applies to.
    #[must_use]
    pub const fn entity(self) -> EntityId {
        match self {
            Self::Created(e)
            | Self::Destroyed(e)
            | Self::Attached(e, _)
            | Self::Changed(e, _)
            | Self::Removed(e, _) => e,
        }
    }

    /// The component involved, if any.
    #[must_use]
    pub const fn component(self) -> Option<ComponentKind> {
        match self {
            Self::Attached(_, k) | Self::Changed(_, k) | Self::Removed(_, k) => Some(k),
            Self::Created(_) | Self::Destroyed(_) => None,
        }
    }
}

/// One journal entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreChange {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    /// The change.
    pub kind: ChangeKind,
}

/// Append-only log of changes since the last truncation.
#[derive(Clone, Debug, Default)]
pub struct ChangeJournal {
    entries: Vec<StoreChange>,
    last_seq: u64,
}

impl ChangeJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a change and returns its sequence number.
    pub fn record(&mut self, kind: ChangeKind) -> u64 {
        self.last_seq += 1;
        self.entries.push(StoreChange {
            seq: self.last_seq,
            kind,
        });
        self.last_seq
    }

    /// Sequence number of the newest change ever recorded.
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Changes with a sequence number greater than `seq` that have not been
    /// truncated yet.
    #[must_use]
    pub fn since(&self, seq: u64) -> &[StoreChange] {
        let start = self.entries.partition_point(|c| c.seq <= seq);
        &self.entries[start..]
    }

    /// Removes and returns all retained changes. Sequence numbers keep counting.
    pub fn take(&mut self) -> Vec<StoreChange> {
        std::mem::take(&mut self.entries)
    }

    /// Drops changes with a sequence number up to and including `seq`.
    /// Returns how many were dropped.
    pub fn discard_through(&mut self, seq: u64) -> usize {
        let end = self.entries.partition_point(|c| c.seq <= seq);
        self.entries.drain(..end).count()
    }

    /// Number of retained changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no changes are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

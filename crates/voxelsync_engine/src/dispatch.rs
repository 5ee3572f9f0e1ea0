//! Breadth-first event dispatch.
//!
//! Events published while handlers run are queued for the next pass, never
//! delivered recursively. A call to [`EventSystem::process`] runs passes until
//! the queue is empty, so when it returns the tick's events have settled.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace};
use voxelsync_foundation::{Error, EventKind, Limit, Result};
use voxelsync_storage::{EntityManager, EventLibrary, StoreChange};

use crate::event::{Envelope, Event, Target};

/// Handle returned by subscriptions, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Handler for one event kind.
pub type EventHandler = Box<dyn FnMut(&Event, Target, &mut DispatchContext<'_>) -> Result<()>>;

/// Handler for implicit store change notifications.
pub type ChangeHandler = Box<dyn FnMut(&StoreChange, &mut DispatchContext<'_>) -> Result<()>>;

/// What a handler may touch while it runs.
pub struct DispatchContext<'a> {
    store: &'a mut EntityManager,
    library: &'a EventLibrary,
    queued: &'a mut Vec<Envelope>,
}

impl DispatchContext<'_> {
    /// The entity store.
    #[must_use]
    pub fn store(&self) -> &EntityManager {
        self.store
    }

    /// The entity store, mutably.
    pub fn store_mut(&mut self) -> &mut EntityManager {
        self.store
    }

    /// Queues an event for the next pass.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEvent` if the kind is not registered.
    pub fn publish(&mut self, event: Event, target: Target) -> Result<()> {
        check_kind(self.library, event.kind)?;
        self.queued.push(Envelope { event, target });
        Ok(())
    }
}

/// Counters from one [`EventSystem::process`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Passes run.
    pub passes: u32,
    /// Events delivered to their subscribers.
    pub delivered: usize,
    /// Store changes delivered to change subscribers.
    pub changes: usize,
    /// Events dropped because their target entity was dead.
    pub dropped: usize,
}

/// Typed publish/subscribe hub.
pub struct EventSystem {
    library: Arc<EventLibrary>,
    handlers: HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>,
    change_handlers: Vec<(SubscriptionId, ChangeHandler)>,
    queue: Vec<Envelope>,
    outbound: Vec<Envelope>,
    change_cursor: u64,
    next_id: u64,
    max_passes: u32,
}

impl EventSystem {
    /// Default bound on passes per `process` call.
    pub const DEFAULT_MAX_PASSES: u32 = 64;

    /// Creates a dispatcher for the given event library.
    #[must_use]
    pub fn new(library: Arc<EventLibrary>) -> Self {
        Self {
            library,
            handlers: HashMap::new(),
            change_handlers: Vec::new(),
            queue: Vec::new(),
            outbound: Vec::new(),
            change_cursor: 0,
            next_id: 0,
            max_passes: Self::DEFAULT_MAX_PASSES,
        }
    }

    /// Sets the maximum passes before the kill switch triggers.
    #[must_use]
    pub fn with_max_passes(mut self, limit: u32) -> Self {
        self.max_passes = limit.max(1);
        self
    }

    /// The event library.
    #[must_use]
    pub fn library(&self) -> &Arc<EventLibrary> {
        &self.library
    }

    /// Subscribes a handler to one event kind.
    ///
    /// Handlers of a kind run in subscription order.
    pub fn subscribe(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&Event, Target, &mut DispatchContext<'_>) -> Result<()> + 'static,
    ) -> SubscriptionId {
        let id = self.next_subscription();
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Subscribes a handler to store change notifications.
    pub fn subscribe_changes(
        &mut self,
        handler: impl FnMut(&StoreChange, &mut DispatchContext<'_>) -> Result<()> + 'static,
    ) -> SubscriptionId {
        let id = self.next_subscription();
        self.change_handlers.push((id, Box::new(handler)));
        id
    }

    /// Removes a subscription. Returns false if it was not found.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for list in self.handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sub, _)| *sub == id) {
                list.remove(pos);
                return true;
            }
        }
        if let Some(pos) = self.change_handlers.iter().position(|(sub, _)| *sub == id) {
            self.change_handlers.remove(pos);
            return true;
        }
        false
    }

    /// Queues an event for the next `process` call.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEvent` if the kind is not registered.
    pub fn publish(&mut self, event: Event, target: Target) -> Result<()> {
        check_kind(&self.library, event.kind)?;
        self.queue.push(Envelope { event, target });
        Ok(())
    }

    /// Sequence number of the newest store change delivered to change handlers.
    #[must_use]
    pub fn change_cursor(&self) -> u64 {
        self.change_cursor
    }

    /// Number of events waiting for dispatch.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Dispatches queued events and store changes until nothing is left.
    ///
    /// Replicable events are also copied to the outbound buffer, see
    /// [`EventSystem::drain_replicated`].
    ///
    /// # Errors
    ///
    /// Propagates the first handler error, or `LimitExceeded` if work is still
    /// queued after the maximum number of passes. After a handler error the
    /// failed event is consumed and everything behind it stays queued for the
    /// next call.
    pub fn process(&mut self, store: &mut EntityManager) -> Result<DispatchStats> {
        let mut handlers = std::mem::take(&mut self.handlers);
        let mut change_handlers = std::mem::take(&mut self.change_handlers);
        let mut stats = DispatchStats::default();

        let result = self.run_passes(store, &mut handlers, &mut change_handlers, &mut stats);

        self.handlers = handlers;
        self.change_handlers = change_handlers;
        result.map(|()| {
            if stats.passes > 0 {
                trace!("dispatch settled: {stats:?}");
            }
            stats
        })
    }

    /// Takes the replicable events dispatched since the last call.
    pub fn drain_replicated(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbound)
    }

    /// Drops queued events, pending replication and every subscription.
    pub fn clear(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.outbound.clear();
        self.handlers.clear();
        self.change_handlers.clear();
        debug!("event system cleared ({dropped} queued events dropped)");
    }

    // --- Private helpers ---

    fn next_subscription(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    fn run_passes(
        &mut self,
        store: &mut EntityManager,
        handlers: &mut HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>,
        change_handlers: &mut [(SubscriptionId, ChangeHandler)],
        stats: &mut DispatchStats,
    ) -> Result<()> {
        loop {
            let changes: Vec<StoreChange> = if change_handlers.is_empty() {
                Vec::new()
            } else {
                store.changes_since(self.change_cursor).to_vec()
            };
            self.change_cursor = store.last_seq();

            if changes.is_empty() && self.queue.is_empty() {
                return Ok(());
            }
            if stats.passes >= self.max_passes {
                return Err(Error::limit_exceeded(Limit::MaxDispatchPasses {
                    limit: self.max_passes,
                    pending: self.queue.len() + changes.len(),
                }));
            }
            stats.passes += 1;

            let mut batch = std::mem::take(&mut self.queue).into_iter();
            let mut next = Vec::new();
            let mut failure = None;
            let mut ctx = DispatchContext {
                store: &mut *store,
                library: &self.library,
                queued: &mut next,
            };

            'changes: for change in &changes {
                for (_, handler) in change_handlers.iter_mut() {
                    if let Err(e) = handler(change, &mut ctx) {
                        // Later changes are seen again by the next pass.
                        self.change_cursor = change.seq;
                        failure = Some(e);
                        break 'changes;
                    }
                }
                stats.changes += 1;
            }

            while failure.is_none() {
                let Some(envelope) = batch.next() else { break };
                if let Target::Entity(target) = envelope.target {
                    if !ctx.store.is_alive(target) {
                        trace!("dropping {:?} for dead {target:?}", envelope.event.kind);
                        stats.dropped += 1;
                        continue;
                    }
                }
                if let Some(list) = handlers.get_mut(&envelope.event.kind) {
                    let delivered = list.iter_mut().try_for_each(|(_, handler)| {
                        handler(&envelope.event, envelope.target, &mut ctx)
                    });
                    if let Err(e) = delivered {
                        failure = Some(e);
                        break;
                    }
                }
                stats.delivered += 1;
                if self.library.is_replicable(envelope.event.kind) {
                    self.outbound.push(envelope);
                }
            }

            // Events the pass did not reach stay ahead of the ones it queued.
            self.queue = batch.chain(next).collect();
            if let Some(e) = failure {
                return Err(e);
            }
        }
    }
}

fn check_kind(library: &EventLibrary, kind: EventKind) -> Result<()> {
    if library.info(kind).is_some() {
        Ok(())
    } else {
        Err(Error::unknown_event(format!("{kind:?}")))
    }
}

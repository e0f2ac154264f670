use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::state::aggregate::{EventAggregate, MetadataPatch, Participant};

/// Snapshot type handed to readers. A new `Arc` is published for every mutation so
/// [`Arc::ptr_eq`] is a reliable change signal.
pub type AggregateSnapshot = Option<Arc<EventAggregate>>;

/// Single-writer cell holding the currently loaded event aggregate.
///
/// Mutations never edit the published value in place: each one clones the aggregate,
/// applies the change and replaces the slot.
pub struct AggregateStore {
    slot: watch::Sender<AggregateSnapshot>,
}

impl Default for AggregateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (slot, _rx) = watch::channel(None);
        Self { slot }
    }

    /// Current snapshot.
    pub fn get(&self) -> AggregateSnapshot {
        self.slot.borrow().clone()
    }

    /// Identifier of the loaded event, if any.
    pub fn event_id(&self) -> Option<Uuid> {
        self.slot.borrow().as_ref().map(|aggregate| aggregate.event_id)
    }

    /// Watch for replacements of the aggregate.
    pub fn subscribe(&self) -> watch::Receiver<AggregateSnapshot> {
        self.slot.subscribe()
    }

    /// Install a freshly fetched aggregate, replacing whatever was loaded.
    pub fn load(&self, aggregate: EventAggregate) {
        self.slot.send_replace(Some(Arc::new(aggregate)));
    }

    /// Drop the loaded aggregate.
    pub fn clear(&self) {
        self.slot.send_replace(None);
    }

    /// Shallow-merge `patch` into the metadata. Returns whether anything changed.
    pub fn set_metadata(&self, patch: &MetadataPatch) -> bool {
        self.update(|aggregate| {
            let mut metadata = aggregate.metadata.clone();
            patch.apply_to(&mut metadata);
            if metadata == aggregate.metadata {
                return None;
            }
            let mut next = aggregate.clone();
            next.metadata = metadata;
            Some(next)
        })
    }

    /// Replace the whole roster.
    pub fn set_participants(&self, participants: Vec<Participant>) -> bool {
        self.update(|aggregate| {
            let mut next = aggregate.clone();
            next.replace_participants(participants);
            (next != *aggregate).then_some(next)
        })
    }

    /// Insert or replace a single roster entry.
    pub fn upsert_participant(&self, entry: Participant) -> bool {
        self.update(|aggregate| {
            if aggregate.participants.get(&entry.user_id) == Some(&entry) {
                return None;
            }
            let mut next = aggregate.clone();
            next.participants.insert(entry.user_id, entry);
            next.normalize_owner();
            Some(next)
        })
    }

    /// Remove the roster entry for `user_id`; the owner entry is re-synthesized.
    pub fn remove_participant(&self, user_id: Uuid) -> bool {
        self.update(|aggregate| {
            if !aggregate.participants.contains_key(&user_id) || user_id == aggregate.owner_id {
                return None;
            }
            let mut next = aggregate.clone();
            next.participants.shift_remove(&user_id);
            Some(next)
        })
    }

    /// Update the owner display name and the owner's roster entry.
    pub fn set_owner_username(&self, username: Option<String>) -> bool {
        self.update(|aggregate| {
            if aggregate.owner_username == username {
                return None;
            }
            let mut next = aggregate.clone();
            next.owner_username = username.clone();
            if let Some(entry) = next.participants.get_mut(&next.owner_id) {
                entry.username = username;
            }
            Some(next)
        })
    }

    /// Run `f` while no mutation can be in progress.
    ///
    /// Mutations run their reducer under the same lock, so a flag flipped inside `f` is
    /// observed by every reducer that runs afterwards.
    pub fn fenced<F: FnOnce()>(&self, f: F) {
        self.slot.send_if_modified(|_| {
            f();
            false
        });
    }

    /// Run a reducer against the loaded aggregate and publish its result.
    ///
    /// The reducer returns `None` when the input leaves the aggregate unchanged, in which
    /// case nothing is published. Does nothing when no aggregate is loaded.
    pub fn update<F>(&self, reducer: F) -> bool
    where
        F: FnOnce(&EventAggregate) -> Option<EventAggregate>,
    {
        self.slot.send_if_modified(|slot| {
            let Some(current) = slot.as_ref() else {
                return false;
            };
            match reducer(current) {
                Some(next) => {
                    *slot = Some(Arc::new(next));
                    true
                }
                None => false,
            }
        })
    }
}

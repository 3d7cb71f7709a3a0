//! Polling-diff fallback.
//!
//! When the live channel gives up, the channel degrades to polling: each
//! subscribed collection is re-listed on an interval and diffed against the
//! previous snapshot, synthesizing the create/update/delete events the
//! socket would have pushed. Subscribers cannot tell the difference except
//! for latency.

use std::collections::HashMap;
use voltek_types::{ChangeEvent, Item, ItemId};

/// Serialized per-item snapshot of one collection, keyed by id.
pub type Snapshot = HashMap<ItemId, String>;

/// Builds the snapshot of a listed collection. Items without an id cannot
/// be tracked and are skipped.
#[must_use]
pub fn snapshot_items(items: &[Item]) -> Snapshot {
    items
        .iter()
        .filter_map(|item| {
            let id = item.id()?;
            let serialized = serde_json::to_string(item).ok()?;
            Some((id, serialized))
        })
        .collect()
}

/// Diffs a fresh listing against the previous snapshot.
///
/// - id only in the new listing → create, carrying the item
/// - id in both with a differing serialized form → update, carrying the item
/// - id only in the old snapshot → delete
/// - identical serialization → nothing, so unchanged items never produce
///   spurious updates
#[must_use]
pub fn diff_snapshots(collection: &str, old: &Snapshot, new_items: &[Item]) -> Vec<ChangeEvent> {
    let new = snapshot_items(new_items);
    let mut events = Vec::new();

    for item in new_items {
        let Some(id) = item.id() else { continue };
        match old.get(&id) {
            None => events.push(ChangeEvent::created(collection, id, item.clone())),
            Some(previous) if new.get(&id) != Some(previous) => {
                events.push(ChangeEvent::updated(collection, id, item.clone()));
            }
            Some(_) => {}
        }
    }

    for id in old.keys() {
        if !new.contains_key(id) {
            events.push(ChangeEvent::deleted(collection, id.clone()));
        }
    }

    events
}

/// Per-collection baselines the poller diffs against.
#[derive(Default)]
pub(crate) struct Baselines {
    snapshots: HashMap<String, Snapshot>,
}

impl Baselines {
    /// Records a baseline without emitting events. Used when a collection
    /// is first subscribed in fallback, so existing content is not replayed
    /// as a burst of creates.
    pub fn seed(&mut self, collection: &str, items: &[Item]) {
        self.snapshots
            .insert(collection.to_string(), snapshot_items(items));
    }

    /// Diffs a fresh listing against the baseline and advances it. A
    /// collection seen for the first time is seeded silently.
    pub fn advance(&mut self, collection: &str, items: &[Item]) -> Vec<ChangeEvent> {
        let events = match self.snapshots.get(collection) {
            Some(old) => diff_snapshots(collection, old, items),
            None => Vec::new(),
        };
        self.snapshots
            .insert(collection.to_string(), snapshot_items(items));
        events
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.snapshots.contains_key(collection)
    }

    pub fn remove(&mut self, collection: &str) {
        self.snapshots.remove(collection);
    }
}

//! Change events observed on collections.
//!
//! One event type covers both delivery paths: frames pushed over the live
//! websocket and changes synthesized by the polling fallback. Subscribers
//! cannot tell the two apart, which is the point.

use crate::{Item, ItemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of change that happened to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    /// Wire name of the change kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Maps a server event name to a change kind.
    ///
    /// Returns `None` for event names that are not item changes (the server
    /// sends `init` on subscription confirmation, and future protocol
    /// revisions may add more).
    #[must_use]
    pub fn from_wire(event: &str) -> Option<Self> {
        match event {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observed change to one item of one collection.
///
/// Delete events carry no item body; the id is all the server knows by then.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,

    /// The collection the item belongs to.
    pub collection: String,

    /// The id of the affected item.
    pub key: ItemId,

    /// The item body after the change. `None` for deletes.
    pub item: Option<Item>,

    /// When this process observed the change. For polled changes this is
    /// the diff time, not the time the change happened upstream.
    pub observed_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Creates an event observed now.
    #[must_use]
    pub fn new(
        kind: ChangeKind,
        collection: impl Into<String>,
        key: ItemId,
        item: Option<Item>,
    ) -> Self {
        Self {
            kind,
            collection: collection.into(),
            key,
            item,
            observed_at: Utc::now(),
        }
    }

    /// Creates a create event carrying the new item.
    #[must_use]
    pub fn created(collection: impl Into<String>, key: ItemId, item: Item) -> Self {
        Self::new(ChangeKind::Create, collection, key, Some(item))
    }

    /// Creates an update event carrying the new item state.
    #[must_use]
    pub fn updated(collection: impl Into<String>, key: ItemId, item: Item) -> Self {
        Self::new(ChangeKind::Update, collection, key, Some(item))
    }

    /// Creates a delete event.
    #[must_use]
    pub fn deleted(collection: impl Into<String>, key: ItemId) -> Self {
        Self::new(ChangeKind::Delete, collection, key, None)
    }
}

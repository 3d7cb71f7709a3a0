//! Composite keys for caching and edit tracking.

use crate::{Error, ItemId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed pseudo-id used to key singleton collections in the cache.
/// Singleton reads have no id on the wire, but every cache entry needs one.
pub const SINGLETON_ID: &str = "__singleton__";

/// Identifies one item within one collection. The unit of caching and
/// request deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub collection: String,
    pub id: ItemId,
}

impl ItemKey {
    /// Creates a key for a regular collection item.
    #[must_use]
    pub fn new(collection: impl Into<String>, id: impl Into<ItemId>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates the key under which a singleton collection is cached.
    #[must_use]
    pub fn singleton(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: ItemId::new(SINGLETON_ID),
        }
    }

    /// Returns true if this key addresses a singleton collection.
    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.id.as_str() == SINGLETON_ID
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Identifies one field of one item. The unit of edit tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldKey {
    pub collection: String,
    pub item: ItemId,
    pub field: String,
}

impl FieldKey {
    /// Creates a field key.
    #[must_use]
    pub fn new(
        collection: impl Into<String>,
        item: impl Into<ItemId>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            item: item.into(),
            field: field.into(),
        }
    }

    /// Projects the key down to the item it belongs to.
    #[must_use]
    pub fn item_key(&self) -> ItemKey {
        ItemKey::new(self.collection.clone(), self.item.clone())
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.collection, self.item, self.field)
    }
}

impl FromStr for FieldKey {
    type Err = Error;

    /// Parses `collection:item:field`. The field segment may itself contain
    /// colons; the first two separators win.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(collection), Some(item), Some(field))
                if !collection.is_empty() && !item.is_empty() && !field.is_empty() =>
            {
                Ok(Self::new(collection, item, field))
            }
            _ => Err(Error::InvalidFieldKey(s.to_string())),
        }
    }
}

//! Content source abstraction.
//!
//! Defines the read/write interface the loader, the realtime channel and the
//! editor depend on, keeping the concrete CMS dialect behind one seam.

use crate::error::ApiResult;
use async_trait::async_trait;
use serde_json::{Map, Value};
use voltek_types::{Item, ItemId};

/// Abstract content backend.
///
/// Implementations map these calls onto whatever the CMS actually speaks;
/// everything above this trait is dialect-agnostic.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetches a single item by id.
    async fn fetch_item(&self, collection: &str, id: &ItemId) -> ApiResult<Item>;

    /// Fetches several items of one collection in a single request.
    /// Ids that do not exist are simply absent from the result.
    async fn fetch_items(&self, collection: &str, ids: &[ItemId]) -> ApiResult<Vec<Item>>;

    /// Fetches a singleton collection (one record, no per-item id).
    async fn fetch_singleton(&self, collection: &str) -> ApiResult<Item>;

    /// Fetches the full contents of a collection.
    async fn list_items(&self, collection: &str) -> ApiResult<Vec<Item>>;

    /// Applies a partial update to one item, returning the updated item.
    async fn update_item(
        &self,
        collection: &str,
        id: &ItemId,
        patch: Map<String, Value>,
    ) -> ApiResult<Item>;
}

/// A mock content source for testing.
pub mod mock {
    use super::*;
    use crate::error::ApiError;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    /// Per-method call counts recorded by a [`MockSource`].
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct CallCounts {
        pub single: usize,
        pub batch: usize,
        pub singleton: usize,
        pub list: usize,
        pub update: usize,
    }

    impl CallCounts {
        /// Total read calls of any kind.
        #[must_use]
        pub fn fetches(&self) -> usize {
            self.single + self.batch + self.singleton + self.list
        }
    }

    /// One `update_item` call as seen by the mock.
    #[derive(Debug, Clone)]
    pub struct RecordedUpdate {
        pub collection: String,
        pub id: ItemId,
        pub patch: Map<String, Value>,
    }

    #[derive(Default)]
    struct MockData {
        collections: HashMap<String, Vec<Item>>,
        singletons: HashMap<String, Item>,
    }

    #[derive(Default)]
    struct MockFailures {
        collections: HashMap<String, ApiError>,
        batches: HashMap<String, ApiError>,
        items: HashMap<(String, ItemId), ApiError>,
    }

    /// A programmable in-memory content source.
    ///
    /// Collections are plain vectors of items matched by their `id` field.
    /// Failures can be injected per collection, per batch fetch, or per
    /// item, and every call is counted so tests can assert on how the
    /// caller batched its requests.
    #[derive(Default)]
    pub struct MockSource {
        data: Mutex<MockData>,
        failures: Mutex<MockFailures>,
        updates: Mutex<Vec<RecordedUpdate>>,
        holds: Mutex<VecDeque<Arc<Notify>>>,
        single: AtomicUsize,
        batch: AtomicUsize,
        singleton: AtomicUsize,
        list: AtomicUsize,
        update: AtomicUsize,
    }

    impl MockSource {
        /// Creates an empty mock source.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Inserts or replaces an item, matched by its `id` field.
        pub fn insert(&self, collection: &str, item: Item) {
            let mut data = self.data.lock().unwrap();
            let items = data.collections.entry(collection.to_string()).or_default();
            match item.id().and_then(|id| {
                items.iter().position(|existing| existing.id() == Some(id.clone()))
            }) {
                Some(index) => items[index] = item,
                None => items.push(item),
            }
        }

        /// Replaces a collection's entire contents.
        pub fn set_collection(&self, collection: &str, items: Vec<Item>) {
            self.data
                .lock()
                .unwrap()
                .collections
                .insert(collection.to_string(), items);
        }

        /// Sets a singleton collection's record.
        pub fn set_singleton(&self, collection: &str, item: Item) {
            self.data
                .lock()
                .unwrap()
                .singletons
                .insert(collection.to_string(), item);
        }

        /// Removes an item from a collection.
        pub fn remove(&self, collection: &str, id: &ItemId) {
            let mut data = self.data.lock().unwrap();
            if let Some(items) = data.collections.get_mut(collection) {
                items.retain(|item| item.id().as_ref() != Some(id));
            }
        }

        /// Fails every call touching the collection.
        pub fn fail_collection(&self, collection: &str, error: ApiError) {
            self.failures
                .lock()
                .unwrap()
                .collections
                .insert(collection.to_string(), error);
        }

        /// Fails only multi-id fetches for the collection; single-item
        /// fetches still go through.
        pub fn fail_batches(&self, collection: &str, error: ApiError) {
            self.failures
                .lock()
                .unwrap()
                .batches
                .insert(collection.to_string(), error);
        }

        /// Fails single-item fetches and updates of one specific id.
        pub fn fail_item(&self, collection: &str, id: &ItemId, error: ApiError) {
            self.failures
                .lock()
                .unwrap()
                .items
                .insert((collection.to_string(), id.clone()), error);
        }

        /// Clears all injected failures.
        pub fn clear_failures(&self) {
            *self.failures.lock().unwrap() = MockFailures::default();
        }

        /// Holds the next read call until the returned handle is notified.
        /// Lets a test keep a request deliberately in flight.
        pub fn hold_next_fetch(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.holds.lock().unwrap().push_back(gate.clone());
            gate
        }

        /// Per-method call counts so far.
        #[must_use]
        pub fn counts(&self) -> CallCounts {
            CallCounts {
                single: self.single.load(Ordering::SeqCst),
                batch: self.batch.load(Ordering::SeqCst),
                singleton: self.singleton.load(Ordering::SeqCst),
                list: self.list.load(Ordering::SeqCst),
                update: self.update.load(Ordering::SeqCst),
            }
        }

        /// All recorded `update_item` calls, in order.
        #[must_use]
        pub fn updates(&self) -> Vec<RecordedUpdate> {
            self.updates.lock().unwrap().clone()
        }

        async fn maybe_hold(&self) {
            let gate = self.holds.lock().unwrap().pop_front();
            if let Some(gate) = gate {
                gate.notified().await;
            }
        }

        fn collection_failure(&self, collection: &str) -> Option<ApiError> {
            self.failures
                .lock()
                .unwrap()
                .collections
                .get(collection)
                .cloned()
        }

        fn item_failure(&self, collection: &str, id: &ItemId) -> Option<ApiError> {
            let failures = self.failures.lock().unwrap();
            failures
                .items
                .get(&(collection.to_string(), id.clone()))
                .cloned()
                .or_else(|| failures.collections.get(collection).cloned())
        }
    }

    #[async_trait]
    impl ContentSource for MockSource {
        async fn fetch_item(&self, collection: &str, id: &ItemId) -> ApiResult<Item> {
            self.single.fetch_add(1, Ordering::SeqCst);
            self.maybe_hold().await;
            if let Some(error) = self.item_failure(collection, id) {
                return Err(error);
            }
            self.data
                .lock()
                .unwrap()
                .collections
                .get(collection)
                .and_then(|items| {
                    items
                        .iter()
                        .find(|item| item.id().as_ref() == Some(id))
                        .cloned()
                })
                .ok_or(ApiError::NotFound)
        }

        async fn fetch_items(&self, collection: &str, ids: &[ItemId]) -> ApiResult<Vec<Item>> {
            self.batch.fetch_add(1, Ordering::SeqCst);
            self.maybe_hold().await;
            {
                let failures = self.failures.lock().unwrap();
                if let Some(error) = failures
                    .batches
                    .get(collection)
                    .or_else(|| failures.collections.get(collection))
                {
                    return Err(error.clone());
                }
            }
            let data = self.data.lock().unwrap();
            let Some(items) = data.collections.get(collection) else {
                return Ok(Vec::new());
            };
            Ok(items
                .iter()
                .filter(|item| item.id().is_some_and(|id| ids.contains(&id)))
                .cloned()
                .collect())
        }

        async fn fetch_singleton(&self, collection: &str) -> ApiResult<Item> {
            self.singleton.fetch_add(1, Ordering::SeqCst);
            self.maybe_hold().await;
            if let Some(error) = self.collection_failure(collection) {
                return Err(error);
            }
            self.data
                .lock()
                .unwrap()
                .singletons
                .get(collection)
                .cloned()
                .ok_or(ApiError::NotFound)
        }

        async fn list_items(&self, collection: &str) -> ApiResult<Vec<Item>> {
            self.list.fetch_add(1, Ordering::SeqCst);
            self.maybe_hold().await;
            if let Some(error) = self.collection_failure(collection) {
                return Err(error);
            }
            Ok(self
                .data
                .lock()
                .unwrap()
                .collections
                .get(collection)
                .cloned()
                .unwrap_or_default())
        }

        async fn update_item(
            &self,
            collection: &str,
            id: &ItemId,
            patch: Map<String, Value>,
        ) -> ApiResult<Item> {
            self.update.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.item_failure(collection, id) {
                return Err(error);
            }
            let updated = {
                let mut data = self.data.lock().unwrap();
                let item = data
                    .collections
                    .get_mut(collection)
                    .and_then(|items| {
                        items
                            .iter_mut()
                            .find(|item| item.id().as_ref() == Some(id))
                    })
                    .ok_or(ApiError::NotFound)?;
                for (field, value) in &patch {
                    item.set(field.clone(), value.clone());
                }
                item.clone()
            };
            self.updates.lock().unwrap().push(RecordedUpdate {
                collection: collection.to_string(),
                id: id.clone(),
                patch,
            });
            Ok(updated)
        }
    }
}

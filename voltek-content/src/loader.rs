//! Batched, deduplicated content reads.
//!
//! Storefront pages resolve dozens of fields during one render, most of them
//! from a handful of items. [`ContentLoader`] sits between those reads and
//! the [`ContentSource`] and makes the traffic sane:
//!
//! - resolved reads are cached for a short TTL (see [`CacheStore`]),
//! - concurrent reads of the same item share one request,
//! - reads arriving within a short window coalesce into one multi-id fetch
//!   per collection.
//!
//! Cache bypass is supported for read-after-write paths: it invalidates the
//! key first, and if a fetch is already in flight it retires that fetch's
//! ticket so the stale response can neither resolve waiters nor write the
//! cache.

use crate::cache::CacheStore;
use crate::error::{ContentError, ContentResult};
use crate::format::ContentFormatter;
use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::time::Duration;
use tracing::{debug, warn};
use voltek_api::{ApiResult, ContentSource};
use voltek_types::{Item, ItemId, ItemKey};

/// What a pending read eventually resolves to. `Ok(None)` covers the
/// expected absences (not found, permission denied).
type Resolution = Result<Option<Item>, ContentError>;

/// Tuning knobs for a [`ContentLoader`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// How long a resolved read stays fresh.
    pub cache_ttl: Duration,
    /// How long the first queued read waits for company before flushing.
    pub batch_window: Duration,
    /// Collections that hold a single record and are fetched without an id.
    pub singletons: HashSet<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_millis(5000),
            batch_window: Duration::from_millis(10),
            singletons: HashSet::from(["settings".to_string()]),
        }
    }
}

/// One key's outstanding fetch: the callers waiting on it, whether a network
/// request has actually started, and the ticket the response must present.
struct PendingSlot {
    ticket: u64,
    in_flight: bool,
    waiters: Vec<oneshot::Sender<Resolution>>,
}

/// Ids queued for the next flush, grouped by collection.
#[derive(Default)]
struct BatchState {
    queue: HashMap<String, HashSet<ItemId>>,
    scheduled: bool,
}

/// A snapshot of one queued key taken at flush time. The ticket ties the
/// eventual response back to the slot; the epoch ties the cache write back
/// to the invalidation state the fetch started under.
struct FetchJob {
    key: ItemKey,
    ticket: u64,
    epoch: u64,
}

/// Cache-first, deduplicating, batching reader over a [`ContentSource`].
///
/// Cheap to clone; clones share the cache, the pending table and the batch
/// queue.
#[derive(Clone)]
pub struct ContentLoader {
    source: Arc<dyn ContentSource>,
    config: LoaderConfig,
    formatter: ContentFormatter,
    cache: Arc<RwLock<CacheStore>>,
    pending: Arc<Mutex<HashMap<ItemKey, PendingSlot>>>,
    batch: Arc<Mutex<BatchState>>,
    next_ticket: Arc<AtomicU64>,
}

impl ContentLoader {
    /// Creates a loader over the given source.
    #[must_use]
    pub fn new(source: Arc<dyn ContentSource>, config: LoaderConfig) -> Self {
        Self {
            cache: Arc::new(RwLock::new(CacheStore::new(config.cache_ttl))),
            source,
            config,
            formatter: ContentFormatter::default(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            batch: Arc::new(Mutex::new(BatchState::default())),
            next_ticket: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Replaces the formatter applied by [`ContentLoader::field`].
    #[must_use]
    pub fn with_formatter(mut self, formatter: ContentFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Reads one field of one item, normalized for display.
    ///
    /// A missing item, missing field or null value all come back as `""`;
    /// only transport-class failures surface as errors.
    pub async fn field(
        &self,
        collection: &str,
        id: impl Into<ItemId>,
        field: &str,
    ) -> ContentResult<String> {
        let raw = self.raw_field_value(collection, id.into(), field, false).await?;
        Ok(self.formatter.format(&raw))
    }

    /// Like [`ContentLoader::field`], but invalidates the key first and
    /// guarantees the value comes from a fetch issued no earlier than this
    /// call.
    pub async fn field_bypassing_cache(
        &self,
        collection: &str,
        id: impl Into<ItemId>,
        field: &str,
    ) -> ContentResult<String> {
        let raw = self.raw_field_value(collection, id.into(), field, true).await?;
        Ok(self.formatter.format(&raw))
    }

    /// Reads one field without the formatting pass.
    pub async fn field_raw(
        &self,
        collection: &str,
        id: impl Into<ItemId>,
        field: &str,
    ) -> ContentResult<String> {
        self.raw_field_value(collection, id.into(), field, false).await
    }

    /// Reads a whole item. `Ok(None)` for not-found and permission-denied.
    pub async fn item(
        &self,
        collection: &str,
        id: impl Into<ItemId>,
    ) -> ContentResult<Option<Item>> {
        self.item_with(collection, id, false).await
    }

    /// Reads a whole item, optionally bypassing the cache.
    pub async fn item_with(
        &self,
        collection: &str,
        id: impl Into<ItemId>,
        bypass_cache: bool,
    ) -> ContentResult<Option<Item>> {
        let key = self.key_for(collection, id.into());
        self.resolve(key, bypass_cache).await
    }

    // ── Invalidation ─────────────────────────────────────────────────────

    /// Drops the cached entry for an item and retires any in-flight write
    /// of it. Call after every successful content write.
    pub async fn invalidate(&self, collection: &str, id: impl Into<ItemId>) {
        let key = self.key_for(collection, id.into());
        self.cache.write().await.invalidate(&key);
        debug!("Invalidated {key}");
    }

    /// Singleton variant of [`ContentLoader::invalidate`].
    pub async fn invalidate_singleton(&self, collection: &str) {
        let key = ItemKey::singleton(collection);
        self.cache.write().await.invalidate(&key);
        debug!("Invalidated {key}");
    }

    // ── Introspection ────────────────────────────────────────────────────

    /// Number of keys with an unresolved fetch.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Number of cached entries.
    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }

    // ── Resolution pipeline ──────────────────────────────────────────────

    /// Normalizes singleton collections onto their fixed cache key.
    fn key_for(&self, collection: &str, id: ItemId) -> ItemKey {
        if self.config.singletons.contains(collection) {
            ItemKey::singleton(collection)
        } else {
            ItemKey::new(collection, id)
        }
    }

    async fn raw_field_value(
        &self,
        collection: &str,
        id: ItemId,
        field: &str,
        bypass_cache: bool,
    ) -> ContentResult<String> {
        let key = self.key_for(collection, id);
        let item = self.resolve(key, bypass_cache).await?;
        Ok(match item {
            Some(item) => item.display(field),
            None => String::new(),
        })
    }

    async fn resolve(&self, key: ItemKey, bypass_cache: bool) -> ContentResult<Option<Item>> {
        if bypass_cache {
            self.cache.write().await.invalidate(&key);
        } else {
            let cached = self.cache.write().await.fresh(&key);
            if let Some(resolution) = cached {
                return Ok(resolution);
            }
        }

        let rx = self.join_or_enqueue(&key, bypass_cache).await;
        match rx.await {
            Ok(resolution) => resolution,
            Err(_) => Err(ContentError::Dropped),
        }
    }

    /// Attaches the caller to the key's pending fetch, creating (and
    /// queueing) one if none exists. A bypassing caller that finds a fetch
    /// already on the wire supersedes it: the slot gets a fresh ticket, the
    /// old waiters carry over, and a new fetch is queued, so everybody
    /// resolves against post-invalidation data.
    async fn join_or_enqueue(
        &self,
        key: &ItemKey,
        bypass_cache: bool,
    ) -> oneshot::Receiver<Resolution> {
        let (tx, rx) = oneshot::channel();
        let needs_enqueue = {
            let mut pending = self.pending.lock().await;
            let supersede = pending
                .get(key)
                .is_some_and(|slot| bypass_cache && slot.in_flight);
            if supersede {
                debug!("Superseding in-flight fetch for {key}");
                let mut waiters = match pending.remove(key) {
                    Some(slot) => slot.waiters,
                    None => Vec::new(),
                };
                waiters.push(tx);
                pending.insert(key.clone(), self.new_slot(waiters));
                true
            } else if let Some(slot) = pending.get_mut(key) {
                slot.waiters.push(tx);
                false
            } else {
                pending.insert(key.clone(), self.new_slot(vec![tx]));
                true
            }
        };
        if needs_enqueue {
            self.enqueue(key).await;
        }
        rx
    }

    fn new_slot(&self, waiters: Vec<oneshot::Sender<Resolution>>) -> PendingSlot {
        PendingSlot {
            ticket: self.next_ticket.fetch_add(1, Ordering::Relaxed),
            in_flight: false,
            waiters,
        }
    }

    /// Queues a key for the next flush, arming the debounce timer if this
    /// is the first entry of the cycle.
    async fn enqueue(&self, key: &ItemKey) {
        let mut batch = self.batch.lock().await;
        batch
            .queue
            .entry(key.collection.clone())
            .or_default()
            .insert(key.id.clone());
        if !batch.scheduled {
            batch.scheduled = true;
            let loader = self.clone();
            let window = self.config.batch_window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                loader.flush().await;
            });
        }
    }

    async fn flush(&self) {
        let queue = {
            let mut batch = self.batch.lock().await;
            batch.scheduled = false;
            mem::take(&mut batch.queue)
        };
        for (collection, ids) in queue {
            let loader = self.clone();
            tokio::spawn(async move {
                loader.flush_collection(collection, ids).await;
            });
        }
    }

    /// Resolves every queued id of one collection: the singleton key via
    /// `fetch_singleton`, a lone id via `fetch_item`, several ids via one
    /// `fetch_items`.
    async fn flush_collection(&self, collection: String, ids: HashSet<ItemId>) {
        let jobs = {
            let mut pending = self.pending.lock().await;
            let cache = self.cache.read().await;
            let mut jobs = Vec::new();
            for id in ids {
                let key = ItemKey::new(collection.clone(), id);
                let Some(slot) = pending.get_mut(&key) else {
                    continue;
                };
                if slot.in_flight {
                    continue;
                }
                slot.in_flight = true;
                jobs.push(FetchJob {
                    ticket: slot.ticket,
                    epoch: cache.epoch(&key),
                    key,
                });
            }
            jobs
        };

        let (singleton_jobs, item_jobs): (Vec<_>, Vec<_>) =
            jobs.into_iter().partition(|job| job.key.is_singleton());

        for job in singleton_jobs {
            let outcome = self.source.fetch_singleton(&collection).await.map(Some);
            self.complete_one(job, outcome).await;
        }

        if item_jobs.len() == 1 {
            for job in item_jobs {
                let outcome = self.source.fetch_item(&collection, &job.key.id).await.map(Some);
                self.complete_one(job, outcome).await;
            }
        } else if !item_jobs.is_empty() {
            self.fetch_batch(&collection, item_jobs).await;
        }
    }

    /// One multi-id fetch for the whole batch. Ids absent from the response
    /// resolve as `None`; a transport failure falls back to per-id fetches
    /// so one bad id cannot take the batch down with it.
    async fn fetch_batch(&self, collection: &str, jobs: Vec<FetchJob>) {
        let ids: Vec<ItemId> = jobs.iter().map(|job| job.key.id.clone()).collect();
        match self.source.fetch_items(collection, &ids).await {
            Ok(items) => {
                let mut by_id: HashMap<ItemId, Item> = HashMap::new();
                for item in items {
                    if let Some(id) = item.id() {
                        by_id.insert(id, item);
                    }
                }
                for job in jobs {
                    let outcome = Ok(by_id.remove(&job.key.id));
                    self.complete_one(job, outcome).await;
                }
            }
            Err(err) if err.is_expected() => {
                debug!("Batch read of {collection} denied: {err}");
                for job in jobs {
                    self.complete_one(job, Ok(None)).await;
                }
            }
            Err(err) => {
                warn!("Batch fetch for {collection} failed, retrying ids individually: {err}");
                for job in jobs {
                    let outcome = self.source.fetch_item(collection, &job.key.id).await.map(Some);
                    self.complete_one(job, outcome).await;
                }
            }
        }
    }

    /// Lands one fetch result: normalizes expected absences to `Ok(None)`,
    /// drops results whose ticket was retired, writes the cache only if the
    /// key's epoch is unchanged, then wakes every waiter.
    async fn complete_one(&self, job: FetchJob, outcome: ApiResult<Option<Item>>) {
        let resolution: Resolution = match outcome {
            Ok(data) => Ok(data),
            Err(err) if err.is_expected() => {
                debug!("Treating {} as absent: {err}", job.key);
                Ok(None)
            }
            Err(err) => {
                warn!("Fetch for {} failed: {err}", job.key);
                Err(ContentError::Api(err))
            }
        };

        let waiters = {
            let mut pending = self.pending.lock().await;
            let current = pending
                .get(&job.key)
                .is_some_and(|slot| slot.ticket == job.ticket);
            if !current {
                debug!("Discarding superseded result for {}", job.key);
                return;
            }
            match pending.remove(&job.key) {
                Some(slot) => slot.waiters,
                None => Vec::new(),
            }
        };

        if let Ok(data) = &resolution {
            let stored = self
                .cache
                .write()
                .await
                .store_if_current(&job.key, data.clone(), job.epoch);
            if !stored {
                debug!("Skipping cache write for {}: invalidated while in flight", job.key);
            }
        }

        for waiter in waiters {
            let _ = waiter.send(resolution.clone());
        }
    }
}

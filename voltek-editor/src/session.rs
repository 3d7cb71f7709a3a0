//! Edit session state for inline content editing.
//!
//! An [`EditorSession`] tracks which fields are open for editing, which are
//! mid-save, and the unsaved values staged for each. It owns no network
//! access: [`EditorSession::save_all`] borrows the API and the loader cache
//! it should write through. Dropping the session drops all unsaved state.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use voltek_api::{ApiError, ContentSource};
use voltek_content::ContentLoader;
use voltek_types::{FieldKey, ItemKey};

/// Outcome of one [`EditorSession::save_all`] pass.
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    /// Items whose PATCH went through.
    pub saved_items: usize,
    /// Fields those items carried.
    pub saved_fields: usize,
    /// Items whose PATCH failed; their staged values stay in the session.
    pub failures: Vec<(ItemKey, ApiError)>,
}

impl SaveReport {
    /// True when every staged item reached the API.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default)]
struct SessionState {
    editing: HashSet<FieldKey>,
    updating: HashSet<FieldKey>,
    pending: HashMap<FieldKey, Value>,
}

/// Shared tracker for the fields a user is editing right now.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone, Default)]
pub struct EditorSession {
    inner: Arc<RwLock<SessionState>>,
}

impl EditorSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── Edit flags ───────────────────────────────────────────────────────

    /// Marks a field as being edited. Already-editing fields are left alone.
    pub async fn start_editing(&self, key: FieldKey) {
        if self.inner.write().await.editing.insert(key.clone()) {
            debug!("Editing {key}");
        }
    }

    /// Clears the editing flag. Unknown keys are a no-op.
    pub async fn stop_editing(&self, key: &FieldKey) {
        self.inner.write().await.editing.remove(key);
    }

    /// Marks a field as having a save in flight.
    pub async fn start_updating(&self, key: FieldKey) {
        self.inner.write().await.updating.insert(key);
    }

    pub async fn stop_updating(&self, key: &FieldKey) {
        self.inner.write().await.updating.remove(key);
    }

    pub async fn is_editing(&self, key: &FieldKey) -> bool {
        self.inner.read().await.editing.contains(key)
    }

    pub async fn is_updating(&self, key: &FieldKey) -> bool {
        self.inner.read().await.updating.contains(key)
    }

    /// True while any field at all is open for editing.
    pub async fn is_any_editing(&self) -> bool {
        !self.inner.read().await.editing.is_empty()
    }

    pub async fn editing_count(&self) -> usize {
        self.inner.read().await.editing.len()
    }

    // ── Staged values ────────────────────────────────────────────────────

    /// Stages an unsaved value for a field, replacing any earlier one.
    pub async fn set_pending(&self, key: FieldKey, value: Value) {
        self.inner.write().await.pending.insert(key, value);
    }

    /// The currently staged value for a field, if any.
    pub async fn pending(&self, key: &FieldKey) -> Option<Value> {
        self.inner.read().await.pending.get(key).cloned()
    }

    /// Drops one staged value without saving it.
    pub async fn clear_pending(&self, key: &FieldKey) {
        self.inner.write().await.pending.remove(key);
    }

    pub async fn has_pending_changes(&self) -> bool {
        !self.inner.read().await.pending.is_empty()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.read().await.pending.len()
    }

    // ── Bulk operations ──────────────────────────────────────────────────

    /// Writes every staged value through the API, one PATCH per item, and
    /// invalidates the loader cache for each item that went through.
    ///
    /// Saved fields leave the session; failed items keep their staged
    /// values (and edit flags) so the user can retry. Values staged while
    /// the save was in flight are kept as well. With nothing staged this
    /// returns an empty report without touching the network.
    pub async fn save_all(&self, source: &dyn ContentSource, loader: &ContentLoader) -> SaveReport {
        let staged = {
            let inner = self.inner.read().await;
            inner.pending.clone()
        };
        if staged.is_empty() {
            return SaveReport::default();
        }

        let mut by_item: HashMap<ItemKey, Map<String, Value>> = HashMap::new();
        for (key, value) in &staged {
            by_item
                .entry(key.item_key())
                .or_default()
                .insert(key.field.clone(), value.clone());
        }

        let mut report = SaveReport::default();
        let mut saved: HashSet<ItemKey> = HashSet::new();
        for (item, patch) in by_item {
            let fields = patch.len();
            match source.update_item(&item.collection, &item.id, patch).await {
                Ok(_) => {
                    loader.invalidate(&item.collection, item.id.clone()).await;
                    report.saved_items += 1;
                    report.saved_fields += fields;
                    saved.insert(item);
                }
                Err(err) => {
                    warn!("Saving {item} failed: {err}");
                    report.failures.push((item, err));
                }
            }
        }

        {
            let mut inner = self.inner.write().await;
            inner.editing.retain(|key| !saved.contains(&key.item_key()));
            inner.updating.retain(|key| !saved.contains(&key.item_key()));
            inner.pending.retain(|key, value| {
                !(saved.contains(&key.item_key())
                    && staged.get(key).is_some_and(|sent| *sent == *value))
            });
        }

        info!(
            "Saved {} field(s) across {} item(s), {} failure(s)",
            report.saved_fields,
            report.saved_items,
            report.failures.len()
        );
        report
    }

    /// Discards every staged value and edit flag. Returns how many staged
    /// values were thrown away.
    pub async fn revert_all(&self) -> usize {
        let mut inner = self.inner.write().await;
        let discarded = inner.pending.len();
        inner.pending.clear();
        inner.editing.clear();
        inner.updating.clear();
        if discarded > 0 {
            info!("Discarded {discarded} unsaved field change(s)");
        }
        discarded
    }
}

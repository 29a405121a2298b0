//! The offline object store.
//!
//! Owns two in-memory trees: the *state* tree (the effective view of the
//! store, local edits merged over whatever has been fetched from remote) and
//! the *changes* tree (the sparse diff against the last-saved remote state,
//! with tombstones for local deletions). Every mutation is captured as a
//! reversible history record, the changes tree is persisted through the local
//! cache so unsaved edits survive restarts, and reads fall through three
//! tiers: local state, local tombstones, remote fetch-and-cache.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::warn;

use crate::caching::LocalCache;
use crate::error::{Result, StoreError};
use crate::events::{EventNotifier, StoreEvent};
use crate::objects::{self, Compensation, Slot};
use crate::query::{self, Page, Query};
use crate::remote::RemoteObjectStorage;

/// Cache key under which the serialized changes tree is persisted.
pub const CHANGES_CACHE_KEY: &str = "changesObject";

/// Maximum number of history records retained for undo.
pub const HISTORY_DEPTH: usize = 10;

/// Interceptor seam for cross-cutting concerns.
///
/// Registered middlewares are recorded but operations are not yet routed
/// through them; the registration surface exists so callers can wire
/// middlewares up before the routing lands.
pub trait ObjectStorageMiddleware: Send + Sync {
    fn name(&self) -> &str;
}

/// One reversible mutation: the slots written on apply, plus the
/// compensations captured when the mutation ran. Reverting replays the
/// compensations, restoring both trees to bit-identical content — including
/// any intermediate node the write coerced into a container.
struct HistoryRecord {
    path: String,
    state_apply: Slot,
    changes_apply: Slot,
    state_revert: Option<Compensation>,
    changes_revert: Option<Compensation>,
}

impl HistoryRecord {
    fn new(path: String, state_apply: Slot, changes_apply: Slot) -> Self {
        Self {
            path,
            state_apply,
            changes_apply,
            state_revert: None,
            changes_revert: None,
        }
    }

    fn apply(&mut self, state: &mut Value, changes: &mut Value) {
        self.state_revert = Some(objects::set_slot(state, &self.path, self.state_apply.clone()));
        self.changes_revert =
            Some(objects::set_slot(changes, &self.path, self.changes_apply.clone()));
        objects::cleanup(state, true);
        objects::cleanup(changes, true);
    }

    fn revert(&self, state: &mut Value, changes: &mut Value) {
        if let Some(comp) = &self.state_revert {
            comp.replay(state);
        }
        if let Some(comp) = &self.changes_revert {
            comp.replay(changes);
        }
        objects::cleanup(state, true);
        objects::cleanup(changes, true);
    }
}

fn empty_tree() -> Value {
    Value::Object(Map::new())
}

/// Mutable store state, serialized behind one async lock.
struct StoreState {
    state: Value,
    changes: Value,
    past: VecDeque<HistoryRecord>,
    future: Vec<HistoryRecord>,
}

impl StoreState {
    fn new() -> Self {
        Self {
            state: empty_tree(),
            changes: empty_tree(),
            past: VecDeque::new(),
            future: Vec::new(),
        }
    }
}

/// Offline-first, path-addressed object store.
///
/// Operations take `&self` and are serialized by an internal async lock, so a
/// shared `Arc<OfflineObjectStorage>` is safe. The lock is held across remote
/// suspension points; callers wanting timeouts enforce them outside the store.
pub struct OfflineObjectStorage {
    inner: Mutex<StoreState>,
    cache: Arc<dyn LocalCache>,
    notifier: Option<Arc<dyn EventNotifier>>,
    remote: RwLock<Option<Arc<dyn RemoteObjectStorage>>>,
    middlewares: RwLock<Vec<Arc<dyn ObjectStorageMiddleware>>>,
    hydrated: OnceCell<()>,
    online: AtomicBool,
    autosave: AtomicBool,
}

impl OfflineObjectStorage {
    /// Create a store over a local cache, optionally wired to an event
    /// notifier. The remote storage is bound later via
    /// [`set_remote_object_storage`](Self::set_remote_object_storage).
    pub fn new(cache: Arc<dyn LocalCache>, notifier: Option<Arc<dyn EventNotifier>>) -> Self {
        Self {
            inner: Mutex::new(StoreState::new()),
            cache,
            notifier,
            remote: RwLock::new(None),
            middlewares: RwLock::new(Vec::new()),
            hydrated: OnceCell::new(),
            online: AtomicBool::new(true),
            autosave: AtomicBool::new(false),
        }
    }

    /// Bind the authoritative remote storage.
    pub fn set_remote_object_storage(&self, remote: Arc<dyn RemoteObjectStorage>) {
        *self.remote.write() = Some(remote);
    }

    /// Record a middleware for future extension.
    pub fn register_middleware(&self, middleware: Arc<dyn ObjectStorageMiddleware>) {
        self.middlewares.write().push(middleware);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    /// When offline, reads and searches never contact the remote storage.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    pub fn autosave(&self) -> bool {
        self.autosave.load(Ordering::Relaxed)
    }

    /// When set, every successful mutation, undo, and redo triggers
    /// [`save_changes`](Self::save_changes).
    pub fn set_autosave(&self, autosave: bool) {
        self.autosave.store(autosave, Ordering::Relaxed);
    }

    fn remote(&self) -> Option<Arc<dyn RemoteObjectStorage>> {
        self.remote.read().clone()
    }

    fn notify(&self, event: StoreEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.dispatch(event);
        }
    }

    /// One-time hydration of the changes tree from the local cache.
    ///
    /// Concurrent first calls share the single in-flight initialization, so
    /// the cache is read exactly once per store instance.
    async fn hydrate(&self) -> Result<()> {
        self.hydrated
            .get_or_try_init(|| async {
                if let Some(Value::Object(entries)) = self.cache.get_item(CHANGES_CACHE_KEY).await? {
                    let mut inner = self.inner.lock().await;
                    if let Value::Object(changes) = &mut inner.changes {
                        for (key, value) in entries {
                            changes.insert(key, value);
                        }
                    }
                }
                Ok(())
            })
            .await
            .map(|_: &()| ())
    }

    async fn persist_changes(&self, changes: Value) -> Result<()> {
        self.cache.set_item(CHANGES_CACHE_KEY, changes).await
    }

    /// Apply a fresh mutation: run the record against both trees, persist the
    /// changes tree, push onto the bounded history, invalidate the redo
    /// stack, and notify.
    async fn commit(&self, mut record: HistoryRecord) -> Result<()> {
        self.hydrate().await?;

        {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            record.apply(&mut inner.state, &mut inner.changes);

            inner.past.push_back(record);
            if inner.past.len() > HISTORY_DEPTH {
                inner.past.pop_front();
            }
            // A fresh mutation invalidates records undone against other tree
            // content.
            inner.future.clear();

            let snapshot = inner.changes.clone();
            self.persist_changes(snapshot).await?;
        }

        if self.autosave() {
            self.save_changes().await?;
        }

        self.notify(StoreEvent::DataChange);
        Ok(())
    }

    /// Write `value` at `path` in both trees.
    pub async fn add_object(&self, path: &str, value: Value) -> Result<()> {
        if path.is_empty() {
            return Err(StoreError::MissingParameter("path"));
        }

        let record = HistoryRecord::new(
            path.to_string(),
            Slot::Value(value.clone()),
            Slot::Value(value),
        );
        self.commit(record).await
    }

    /// Overwrite the value at `path` in both trees.
    ///
    /// `Value::Null` is a legitimate stored value here, not a deletion;
    /// deletions go through [`delete_object`](Self::delete_object).
    pub async fn update_object(&self, path: &str, value: Value) -> Result<()> {
        if path.is_empty() {
            return Err(StoreError::MissingParameter("path"));
        }

        let record = HistoryRecord::new(
            path.to_string(),
            Slot::Value(value.clone()),
            Slot::Value(value),
        );
        self.commit(record).await
    }

    /// Remove the node at `path` from the state tree and record a tombstone
    /// in the changes tree, to be deleted remotely on the next save.
    pub async fn delete_object(&self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(StoreError::MissingParameter("path"));
        }

        let record = HistoryRecord::new(
            path.to_string(),
            Slot::Absent,
            Slot::Value(objects::tombstone()),
        );
        self.commit(record).await
    }

    /// Three-tier read.
    ///
    /// 1. A hit in the state tree returns a clone; remote is not consulted.
    /// 2. A tombstone in the changes tree means the object was deleted
    ///    locally: `None`, without re-fetching.
    /// 3. Otherwise delegate to remote (skipped when offline or unbound) and
    ///    cache any hit into the state tree.
    pub async fn get_object(&self, path: &str) -> Result<Option<Value>> {
        if path.is_empty() {
            return Err(StoreError::MissingParameter("path"));
        }

        self.hydrate().await?;
        let mut guard = self.inner.lock().await;

        if let Some(hit) = objects::get_at(&guard.state, path) {
            return Ok(Some(hit.clone()));
        }

        if objects::get_at(&guard.changes, path).is_some_and(objects::is_tombstone) {
            return Ok(None);
        }

        if !self.is_online() {
            return Ok(None);
        }
        let Some(remote) = self.remote() else {
            return Ok(None);
        };

        let fetched = remote.get_object(path).await?;
        if let Some(value) = &fetched {
            objects::set_slot(&mut guard.state, path, Slot::Value(value.clone()));
        }
        Ok(fetched)
    }

    /// Search the collection under `root_path`, reconciling local and remote
    /// result sets.
    ///
    /// The local set is evaluated over the state subtree. When online, the
    /// remote set is fetched, pending changes at `root_path` are merged over
    /// it (local wins, tombstoned entries drop out), the reconciled set is
    /// folded back into the state tree, and finally merged into the local
    /// set. Offline, only the local set is returned.
    pub async fn search_objects(&self, root_path: &str, query: &Query) -> Result<Page> {
        if root_path.is_empty() {
            return Err(StoreError::MissingParameter("path"));
        }

        self.hydrate().await?;
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let mut result = search_local(&inner.state, root_path, query);

        if self.is_online() {
            if let Some(remote) = self.remote() {
                let remote_page = remote.search_objects(root_path, query).await?;

                if !remote_page.value.is_empty() {
                    let mut remote_set = Value::Object(remote_page.value);

                    if let Some(changes_at) = objects::get_at(&inner.changes, root_path) {
                        let changes_at = changes_at.clone();
                        objects::merge_deep(&mut remote_set, &changes_at, true);
                        objects::strip_tombstones(&mut remote_set);
                    }

                    // Cache freshly seen remote documents locally.
                    objects::merge_deep_at(root_path, &mut inner.state, &remote_set, true);

                    if let Value::Object(remote_map) = remote_set {
                        for (key, item) in remote_map {
                            match result.get_mut(&key) {
                                Some(existing) => objects::merge_deep(existing, &item, true),
                                None => {
                                    result.insert(key, item);
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(Page {
            value: result,
            next_page: Some(query.next_page_query()),
            prev_page: query.prev_page_query(),
        })
    }

    pub async fn can_undo(&self) -> bool {
        !self.inner.lock().await.past.is_empty()
    }

    pub async fn can_redo(&self) -> bool {
        !self.inner.lock().await.future.is_empty()
    }

    /// Revert the most recent mutation. No-op when the history is empty.
    pub async fn undo(&self) -> Result<()> {
        self.hydrate().await?;

        {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let Some(record) = inner.past.pop_back() else {
                return Ok(());
            };
            record.revert(&mut inner.state, &mut inner.changes);
            inner.future.push(record);

            let snapshot = inner.changes.clone();
            self.persist_changes(snapshot).await?;
        }

        if self.autosave() {
            self.save_changes().await?;
        }

        self.notify(StoreEvent::DataPush);
        self.notify(StoreEvent::DataChange);
        Ok(())
    }

    /// Re-apply the most recently undone mutation. No-op when nothing was
    /// undone.
    pub async fn redo(&self) -> Result<()> {
        self.hydrate().await?;

        {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let Some(mut record) = inner.future.pop() else {
                return Ok(());
            };
            record.apply(&mut inner.state, &mut inner.changes);
            inner.past.push_back(record);

            let snapshot = inner.changes.clone();
            self.persist_changes(snapshot).await?;
        }

        if self.autosave() {
            self.save_changes().await?;
        }

        self.notify(StoreEvent::DataPush);
        self.notify(StoreEvent::DataChange);
        Ok(())
    }

    /// Whether any edit is pending against the last-saved remote state.
    pub async fn has_unsaved_changes(&self) -> Result<bool> {
        self.hydrate().await?;
        let guard = self.inner.lock().await;
        Ok(matches!(&guard.changes, Value::Object(map) if !map.is_empty()))
    }

    /// Whether an edit (including a pending deletion) exists at `path`.
    pub async fn has_unsaved_changes_at(&self, path: &str) -> Result<bool> {
        if path.is_empty() {
            return Err(StoreError::MissingParameter("path"));
        }

        self.hydrate().await?;
        let guard = self.inner.lock().await;
        Ok(objects::get_at(&guard.changes, path).is_some())
    }

    /// Drop both trees and the durable cache entry. Irreversible; the
    /// undo/redo stacks are left untouched.
    pub async fn discard_changes(&self) -> Result<()> {
        self.hydrate().await?;

        let mut guard = self.inner.lock().await;
        guard.state = empty_tree();
        guard.changes = empty_tree();
        self.persist_changes(empty_tree()).await
    }

    /// Hand the pending changes tree to the remote batch save, then clear the
    /// saved entries. No-op when nothing is pending.
    pub async fn save_changes(&self) -> Result<()> {
        self.hydrate().await?;

        let mut guard = self.inner.lock().await;
        let saved_keys: Vec<String> = match &guard.changes {
            Value::Object(map) if !map.is_empty() => map.keys().cloned().collect(),
            _ => return Ok(()),
        };

        let remote = self.remote().ok_or(StoreError::RemoteNotConfigured)?;
        remote.save_changes(guard.changes.clone()).await?;

        if let Value::Object(map) = &mut guard.changes {
            for key in &saved_keys {
                map.remove(key);
            }
        }

        let snapshot = guard.changes.clone();
        self.persist_changes(snapshot).await?;
        drop(guard);

        self.notify(StoreEvent::DataChange);
        Ok(())
    }

    /// Bulk-refresh from remote: the fetched tree becomes the state tree and
    /// all local changes are discarded. Degrades to a no-op (returning the
    /// current state) when the remote does not support bulk load.
    pub async fn load_data(&self) -> Result<Value> {
        self.hydrate().await?;

        let loaded = match self.remote() {
            Some(remote) => remote.load_data().await?,
            None => None,
        };

        let Some(tree) = loaded else {
            warn!("remote object storage does not support bulk load");
            return Ok(self.inner.lock().await.state.clone());
        };

        let mut guard = self.inner.lock().await;
        guard.state = tree;
        guard.changes = empty_tree();
        self.persist_changes(empty_tree()).await?;
        let state = guard.state.clone();
        drop(guard);

        self.notify(StoreEvent::DataPush);
        self.notify(StoreEvent::DataChange);
        Ok(state)
    }
}

/// Evaluate a query over the state subtree at `root_path`. Empty result when
/// the root is absent.
fn search_local(state: &Value, root_path: &str, query: &Query) -> Map<String, Value> {
    let mut result = Map::new();

    let subtree = match objects::get_at(state, root_path) {
        Some(Value::Object(map)) => map,
        _ => return result,
    };

    let entries: Vec<(String, Value)> = subtree
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (entry_key, item) in query::evaluate(entries, query) {
        result.insert(result_key(&entry_key, &item), item);
    }

    result
}

/// Result keys follow the `collection/identifier` addressing convention: the
/// immediate child segment of the item's own `key` field when present, else
/// the subtree entry key.
fn result_key(entry_key: &str, item: &Value) -> String {
    item.get("key")
        .and_then(Value::as_str)
        .and_then(|key| key.split(objects::PATH_SEPARATOR).filter(|s| !s.is_empty()).nth(1))
        .map(str::to_string)
        .unwrap_or_else(|| entry_key.to_string())
}

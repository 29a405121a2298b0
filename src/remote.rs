//! Remote store port and an in-memory reference backend.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::objects::{self, Slot};
use crate::query::{self, Page, Query};

/// The authoritative backend for stored objects.
///
/// Implementations report failures through their own [`crate::StoreError`]
/// values; the offline store propagates them unchanged and never retries.
#[async_trait]
pub trait RemoteObjectStorage: Send + Sync {
    async fn get_object(&self, path: &str) -> Result<Option<Value>>;

    async fn add_object(&self, path: &str, value: Value) -> Result<()>;

    async fn update_object(&self, path: &str, value: Value) -> Result<()>;

    async fn delete_object(&self, path: &str) -> Result<()>;

    /// Search the collection under `root_path`, applying the query's filters,
    /// ordering, and skip/take window.
    async fn search_objects(&self, root_path: &str, query: &Query) -> Result<Page>;

    /// Apply a whole changes tree in one batch. Tombstoned paths are deletes,
    /// everything else is an upsert.
    async fn save_changes(&self, changes: Value) -> Result<()>;

    /// Bulk load of the entire tree, for backends that support it.
    ///
    /// The default reports the capability as unsupported.
    async fn load_data(&self) -> Result<Option<Value>> {
        Ok(None)
    }
}

/// In-memory backend over a single document tree.
///
/// Counts `get_object` and `search_objects` invocations, so tests can assert
/// that the offline store stayed off the network.
pub struct MemoryObjectStorage {
    data: RwLock<Value>,
    fetches: AtomicU64,
    searches: AtomicU64,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::with_data(Value::Object(Map::new()))
    }

    pub fn with_data(data: Value) -> Self {
        Self {
            data: RwLock::new(data),
            fetches: AtomicU64::new(0),
            searches: AtomicU64::new(0),
        }
    }

    /// Number of `get_object` calls served so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of `search_objects` calls served so far.
    pub fn search_count(&self) -> u64 {
        self.searches.load(Ordering::Relaxed)
    }

    /// Snapshot of the full backing tree.
    pub fn snapshot(&self) -> Value {
        self.data.read().clone()
    }
}

impl Default for MemoryObjectStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteObjectStorage for MemoryObjectStorage {
    async fn get_object(&self, path: &str) -> Result<Option<Value>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(objects::get_at(&self.data.read(), path).cloned())
    }

    async fn add_object(&self, path: &str, value: Value) -> Result<()> {
        objects::set_slot(&mut self.data.write(), path, Slot::Value(value));
        Ok(())
    }

    async fn update_object(&self, path: &str, value: Value) -> Result<()> {
        objects::set_slot(&mut self.data.write(), path, Slot::Value(value));
        Ok(())
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        let mut data = self.data.write();
        objects::set_slot(&mut data, path, Slot::Absent);
        objects::cleanup(&mut data, true);
        Ok(())
    }

    async fn search_objects(&self, root_path: &str, query: &Query) -> Result<Page> {
        self.searches.fetch_add(1, Ordering::Relaxed);

        let data = self.data.read();
        let entries: Vec<(String, Value)> = match objects::get_at(&data, root_path) {
            Some(Value::Object(subtree)) => subtree
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => Vec::new(),
        };
        drop(data);

        let items = query::evaluate(entries, query);

        // The backend owns the pagination window.
        let mut value = Map::new();
        for (key, item) in items.into_iter().skip(query.skipping).take(query.taking) {
            value.insert(key, item);
        }

        Ok(Page {
            value,
            next_page: Some(query.next_page_query()),
            prev_page: query.prev_page_query(),
        })
    }

    async fn save_changes(&self, changes: Value) -> Result<()> {
        let mut data = self.data.write();
        if let (Value::Object(target), Value::Object(entries)) = (&mut *data, &changes) {
            apply_changes(target, entries);
        }
        objects::cleanup(&mut data, true);
        Ok(())
    }

    async fn load_data(&self) -> Result<Option<Value>> {
        Ok(Some(self.data.read().clone()))
    }
}

/// Fold a sparse changes map into the backing tree: tombstones delete,
/// object-into-object merges recurse, everything else upserts.
fn apply_changes(target: &mut Map<String, Value>, changes: &Map<String, Value>) {
    for (key, change) in changes {
        if objects::is_tombstone(change) {
            target.remove(key);
            continue;
        }

        if let (Some(Value::Object(existing)), Value::Object(nested)) =
            (target.get_mut(key), change)
        {
            apply_changes(existing, nested);
            continue;
        }

        let mut value = change.clone();
        objects::strip_tombstones(&mut value);
        target.insert(key.clone(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Operator;
    use serde_json::json;

    #[tokio::test]
    async fn test_crud_round_trip() {
        let remote = MemoryObjectStorage::new();

        remote.add_object("pages/page1", json!({"title": "Home"})).await.unwrap();
        assert_eq!(
            remote.get_object("pages/page1").await.unwrap(),
            Some(json!({"title": "Home"}))
        );

        remote.update_object("pages/page1", json!({"title": "Start"})).await.unwrap();
        assert_eq!(
            remote.get_object("pages/page1/title").await.unwrap(),
            Some(json!("Start"))
        );

        remote.delete_object("pages/page1").await.unwrap();
        assert_eq!(remote.get_object("pages/page1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_search_applies_window() {
        let remote = MemoryObjectStorage::new();
        for i in 0..10 {
            remote
                .add_object(&format!("items/item{i:02}"), json!({"n": i}))
                .await
                .unwrap();
        }

        let query = Query::new().order_by("n").skip(4).take(3);
        let page = remote.search_objects("items", &query).await.unwrap();
        let ns: Vec<i64> = page.value.values().map(|v| v["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![4, 5, 6]);
        assert_eq!(page.next_page.unwrap().skipping, 7);
        assert_eq!(page.prev_page.unwrap().skipping, 1);
    }

    #[tokio::test]
    async fn test_search_filters() {
        let remote = MemoryObjectStorage::new();
        remote.add_object("files/a", json!({"mime": "image/png"})).await.unwrap();
        remote.add_object("files/b", json!({"mime": "text/html"})).await.unwrap();

        let query = Query::new().where_("mime", Operator::Contains, "image");
        let page = remote.search_objects("files", &query).await.unwrap();
        assert_eq!(page.value.len(), 1);
        assert!(page.value.contains_key("a"));
    }

    #[tokio::test]
    async fn test_save_changes_applies_values_and_tombstones() {
        let remote = MemoryObjectStorage::with_data(json!({
            "employees": {
                "employee1": {"name": "Ada"},
                "employee2": {"name": "Bob"}
            }
        }));

        let changes = json!({
            "employees": {
                "employee1": objects::tombstone(),
                "employee2": {"name": "Robert"},
                "employee3": {"name": "Eve"}
            }
        });

        remote.save_changes(changes).await.unwrap();

        assert_eq!(remote.get_object("employees/employee1").await.unwrap(), None);
        assert_eq!(
            remote.get_object("employees/employee2/name").await.unwrap(),
            Some(json!("Robert"))
        );
        assert_eq!(
            remote.get_object("employees/employee3/name").await.unwrap(),
            Some(json!("Eve"))
        );
    }

    #[tokio::test]
    async fn test_load_data_returns_tree() {
        let remote = MemoryObjectStorage::with_data(json!({"a": 1}));
        assert_eq!(remote.load_data().await.unwrap(), Some(json!({"a": 1})));
    }
}

//! Local cache port used for durability of pending edits.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;

/// Minimal async key-value interface.
///
/// The store uses it with a single fixed key holding the serialized changes
/// tree, so unsaved edits survive process restarts.
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<Value>>;
    async fn set_item(&self, key: &str, value: Value) -> Result<()>;
}

/// In-memory cache, suitable for tests and non-durable deployments.
#[derive(Default)]
pub struct MemoryCache {
    items: RwLock<HashMap<String, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn get_item(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.items.read().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: Value) -> Result<()> {
        self.items.write().insert(key.to_string(), value);
        Ok(())
    }
}

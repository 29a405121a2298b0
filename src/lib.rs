//! # Offline Object Store
//!
//! An offline-first, path-addressed object store: read and mutate a remote
//! hierarchical document store while disconnected, buffer edits locally,
//! merge them transparently with server state, and undo/redo any mutation.
//!
//! ## Core Concepts
//!
//! - **State tree**: the effective view — local edits merged over fetched
//!   remote data
//! - **Changes tree**: the sparse diff against the last-saved remote state,
//!   persisted through a local cache so unsaved edits survive restarts
//! - **Tombstones**: local deletions recorded distinctly from "no edit"
//! - **History**: a bounded log of reversible mutations with exact inverses
//!
//! ## Example
//!
//! ```ignore
//! use driftstore::{MemoryCache, MemoryObjectStorage, OfflineObjectStorage};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let store = OfflineObjectStorage::new(Arc::new(MemoryCache::new()), None);
//! store.set_remote_object_storage(Arc::new(MemoryObjectStorage::new()));
//!
//! store.add_object("pages/home", json!({"title": "Home"})).await?;
//! store.undo().await?;
//! store.save_changes().await?;
//! ```

pub mod caching;
pub mod error;
pub mod events;
pub mod objects;
pub mod query;
pub mod remote;
pub mod store;

// Re-exports
pub use caching::{LocalCache, MemoryCache};
pub use error::{Result, StoreError};
pub use events::{EventNotifier, StoreEvent};
pub use objects::{Compensation, Slot};
pub use query::{Filter, Operator, OrderDirection, Page, Query, DEFAULT_PAGE_SIZE};
pub use remote::{MemoryObjectStorage, RemoteObjectStorage};
pub use store::{
    ObjectStorageMiddleware, OfflineObjectStorage, CHANGES_CACHE_KEY, HISTORY_DEPTH,
};

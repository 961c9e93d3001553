//! weir-kv - key-value stores behind the script `Store` constructor.
//!
//! Stores are registered under a name at init time (`"cache"`, `"session"`)
//! and looked up by scripts with `new Store("cache")`. Two backends:
//! an in-memory LRU with optional TTL, and a redb-backed file store.

mod manager;
mod memory;
mod store;

use std::time::Duration;

pub use manager::{open_store, register_store, StoreHandle};
pub use memory::MemoryStore;
pub use store::KvStore;

/// Error type for KV operations
#[derive(Debug)]
pub enum KvError {
    /// Database error
    Database(String),
    /// Serialization error
    Serialization(String),
    /// Store not registered under the name
    UnknownStore(String),
    /// Invalid path
    InvalidPath(String),
}

impl std::fmt::Display for KvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KvError::Database(msg) => write!(f, "Database error: {}", msg),
            KvError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            KvError::UnknownStore(name) => write!(f, "Store not registered: {}", name),
            KvError::InvalidPath(msg) => write!(f, "Invalid path: {}", msg),
        }
    }
}

impl std::error::Error for KvError {}

/// Result type for KV operations
pub type KvResult<T> = Result<T, KvError>;

/// Backend-agnostic store interface.
///
/// Values are JSON; `set` takes an optional TTL (ignored by backends that
/// cannot expire).
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> KvResult<Option<serde_json::Value>>;
    fn set(&self, key: &str, value: &serde_json::Value, ttl: Option<Duration>) -> KvResult<()>;
    fn del(&self, key: &str) -> KvResult<()>;
    fn has(&self, key: &str) -> KvResult<bool>;
    fn keys(&self) -> KvResult<Vec<String>>;
    fn len(&self) -> KvResult<usize>;
    fn is_empty(&self) -> KvResult<bool> {
        Ok(self.len()? == 0)
    }
    fn clear(&self) -> KvResult<()>;
}

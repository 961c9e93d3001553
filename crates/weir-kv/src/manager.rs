//! Named store registry.
//!
//! Stores are registered once at init (`register_store("cache", ...)`) and
//! handed out as cheap clones to the script runtime.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::{KvError, KvResult, Store};

/// Shared handle to a registered store.
pub type StoreHandle = Arc<dyn Store>;

static STORES: Lazy<RwLock<HashMap<String, StoreHandle>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a store under a name. Re-registering replaces the previous
/// backend; handles already held keep the old one.
pub fn register_store(name: &str, store: StoreHandle) {
    STORES.write().insert(name.to_string(), store);
}

/// Look up a registered store by name.
pub fn open_store(name: &str) -> KvResult<StoreHandle> {
    STORES
        .read()
        .get(name)
        .cloned()
        .ok_or_else(|| KvError::UnknownStore(name.to_string()))
}

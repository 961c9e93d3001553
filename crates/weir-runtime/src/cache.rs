//! Per-(isolate, script) context cache for standard mode.
//!
//! The first call on a given engine compiles and runs the script once to
//! populate a context; later calls reuse it in O(1). Cache entries carry
//! the script's load generation, so a reload makes every cached context of
//! that script stale without touching the engines.

use std::collections::HashMap;

use parking_lot::Mutex;
use rquickjs::Context;

#[derive(Clone)]
struct Entry {
    version: u64,
    context: Context,
}

/// Context cache keyed by engine id and script id.
#[derive(Default)]
pub struct ContextCache {
    entries: Mutex<HashMap<(u64, String), Entry>>,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cached context, only when its generation still matches.
    pub fn get(&self, isolate: u64, script: &str, version: u64) -> Option<Context> {
        let entries = self.entries.lock();
        entries
            .get(&(isolate, script.to_string()))
            .filter(|e| e.version == version)
            .map(|e| e.context.clone())
    }

    pub fn put(&self, isolate: u64, script: &str, version: u64, context: Context) {
        self.entries
            .lock()
            .insert((isolate, script.to_string()), Entry { version, context });
    }

    /// Drop every cached context referencing a script (reload path).
    pub fn invalidate_script(&self, script: &str) {
        self.entries.lock().retain(|(_, s), _| s != script);
    }

    /// Drop every cached context of one engine (engine retirement path).
    pub fn drop_isolate(&self, isolate: u64) {
        self.entries.lock().retain(|(i, _), _| *i != isolate);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::Isolate;
    use crate::globals::Services;
    use std::sync::Arc;

    fn context() -> Context {
        let isolate = Isolate::new(900, &Config::default()).unwrap();
        let services = Services::for_tests(Arc::new(Config::default()));
        isolate.new_context(&services).unwrap()
    }

    #[test]
    fn version_mismatch_misses() {
        let cache = ContextCache::new();
        cache.put(1, "u", 7, context());

        assert!(cache.get(1, "u", 7).is_some());
        assert!(cache.get(1, "u", 8).is_none());
        assert!(cache.get(2, "u", 7).is_none());
    }

    #[test]
    fn invalidation_paths() {
        let cache = ContextCache::new();
        cache.put(1, "a", 1, context());
        cache.put(1, "b", 1, context());
        cache.put(2, "a", 1, context());

        cache.invalidate_script("a");
        assert_eq!(cache.len(), 1);

        cache.put(2, "a", 2, context());
        cache.drop_isolate(2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(1, "b", 1).is_some());
    }
}

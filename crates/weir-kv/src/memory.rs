//! In-memory LRU store with optional per-key TTL.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::{KvResult, Store};

struct Entry {
    value: serde_json::Value,
    seq: u64,
    expires: Option<Instant>,
}

struct Inner {
    entries: HashMap<String, Entry>,
    // recency index: seq -> key, oldest first
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

/// Bounded in-memory store; least-recently-used keys are evicted once the
/// capacity is reached. Expired keys are dropped lazily on access.
pub struct MemoryStore {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
        }
    }
}

impl Inner {
    fn touch(&mut self, key: &str) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.order.remove(&entry.seq);
            entry.seq = seq;
            self.order.insert(seq, key.to_string());
        }
    }

    fn drop_expired(&mut self, key: &str) -> bool {
        let expired = matches!(
            self.entries.get(key),
            Some(Entry { expires: Some(at), .. }) if *at <= Instant::now()
        );
        if expired {
            if let Some(entry) = self.entries.remove(key) {
                self.order.remove(&entry.seq);
            }
        }
        expired
    }

    fn evict_to(&mut self, capacity: usize) {
        while self.entries.len() > capacity {
            let Some((&seq, _)) = self.order.iter().next() else {
                break;
            };
            if let Some(key) = self.order.remove(&seq) {
                self.entries.remove(&key);
            }
        }
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> KvResult<Option<serde_json::Value>> {
        let mut inner = self.inner.lock();
        if inner.drop_expired(key) {
            return Ok(None);
        }
        let value = inner.entries.get(key).map(|e| e.value.clone());
        if value.is_some() {
            inner.touch(key);
        }
        Ok(value)
    }

    fn set(&self, key: &str, value: &serde_json::Value, ttl: Option<Duration>) -> KvResult<()> {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if let Some(old) = inner.entries.remove(key) {
            inner.order.remove(&old.seq);
        }
        inner.order.insert(seq, key.to_string());
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                seq,
                expires: ttl.map(|t| Instant::now() + t),
            },
        );
        let capacity = self.capacity;
        inner.evict_to(capacity);
        Ok(())
    }

    fn del(&self, key: &str) -> KvResult<()> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.remove(key) {
            inner.order.remove(&entry.seq);
        }
        Ok(())
    }

    fn has(&self, key: &str) -> KvResult<bool> {
        let mut inner = self.inner.lock();
        if inner.drop_expired(key) {
            return Ok(false);
        }
        Ok(inner.entries.contains_key(key))
    }

    fn keys(&self) -> KvResult<Vec<String>> {
        let inner = self.inner.lock();
        let mut keys: Vec<String> = inner.entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn len(&self) -> KvResult<usize> {
        Ok(self.inner.lock().entries.len())
    }

    fn clear(&self) -> KvResult<()> {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_del() {
        let store = MemoryStore::new(8);
        store.set("a", &json!(1), None).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!(1)));
        assert!(store.has("a").unwrap());
        store.del("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn lru_evicts_oldest() {
        let store = MemoryStore::new(2);
        store.set("a", &json!(1), None).unwrap();
        store.set("b", &json!(2), None).unwrap();
        // touch "a" so "b" becomes the eviction candidate
        store.get("a").unwrap();
        store.set("c", &json!(3), None).unwrap();

        assert_eq!(store.len().unwrap(), 2);
        assert!(store.has("a").unwrap());
        assert!(!store.has("b").unwrap());
        assert!(store.has("c").unwrap());
    }

    #[test]
    fn ttl_expires() {
        let store = MemoryStore::new(8);
        store
            .set("a", &json!(1), Some(Duration::from_millis(0)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.get("a").unwrap(), None);
        assert!(!store.has("a").unwrap());
    }

    #[test]
    fn overwrite_keeps_single_entry() {
        let store = MemoryStore::new(8);
        store.set("a", &json!(1), None).unwrap();
        store.set("a", &json!(2), None).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.get("a").unwrap(), Some(json!(2)));
    }
}

//! File-backed store implementation using redb.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::{KvError, KvResult, Store};

// Single table holding JSON-serialized values
const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// KV store backed by redb. Durable across restarts; TTLs are not
/// supported and are ignored.
pub struct KvStore {
    db: Arc<Database>,
}

impl KvStore {
    /// Open or create a store at the given file path. Parent directories
    /// are created as needed.
    pub fn open(path: impl AsRef<Path>) -> KvResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| KvError::InvalidPath(e.to_string()))?;
            }
        }
        let db = Database::create(path).map_err(|e| KvError::Database(e.to_string()))?;

        // Make sure the table exists so reads never race creation
        let write_txn = db
            .begin_write()
            .map_err(|e| KvError::Database(e.to_string()))?;
        {
            let _ = write_txn
                .open_table(TABLE)
                .map_err(|e| KvError::Database(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| KvError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Store for KvStore {
    fn get(&self, key: &str) -> KvResult<Option<serde_json::Value>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| KvError::Database(e.to_string()))?;
        let table = read_txn
            .open_table(TABLE)
            .map_err(|e| KvError::Database(e.to_string()))?;
        let raw = table
            .get(key)
            .map_err(|e| KvError::Database(e.to_string()))?
            .map(|guard| guard.value().to_vec());

        match raw {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| KvError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &serde_json::Value, _ttl: Option<Duration>) -> KvResult<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| KvError::Serialization(e.to_string()))?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| KvError::Database(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| KvError::Database(e.to_string()))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| KvError::Database(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| KvError::Database(e.to_string()))
    }

    fn del(&self, key: &str) -> KvResult<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| KvError::Database(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| KvError::Database(e.to_string()))?;
            table
                .remove(key)
                .map_err(|e| KvError::Database(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| KvError::Database(e.to_string()))
    }

    fn has(&self, key: &str) -> KvResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn keys(&self) -> KvResult<Vec<String>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| KvError::Database(e.to_string()))?;
        let table = read_txn
            .open_table(TABLE)
            .map_err(|e| KvError::Database(e.to_string()))?;
        let mut keys = Vec::new();
        for item in table.iter().map_err(|e| KvError::Database(e.to_string()))? {
            let (key, _) = item.map_err(|e| KvError::Database(e.to_string()))?;
            keys.push(key.value().to_string());
        }
        keys.sort();
        Ok(keys)
    }

    fn len(&self) -> KvResult<usize> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| KvError::Database(e.to_string()))?;
        let table = read_txn
            .open_table(TABLE)
            .map_err(|e| KvError::Database(e.to_string()))?;
        let len = table.len().map_err(|e| KvError::Database(e.to_string()))?;
        Ok(len as usize)
    }

    fn clear(&self) -> KvResult<()> {
        let keys = self.keys()?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| KvError::Database(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| KvError::Database(e.to_string()))?;
            for key in keys {
                table
                    .remove(key.as_str())
                    .map_err(|e| KvError::Database(e.to_string()))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| KvError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(dir.path().join("kv.redb")).unwrap();

        store.set("a", &json!({"n": 1}), None).unwrap();
        store.set("b", &json!([1, 2]), None).unwrap();

        assert_eq!(store.get("a").unwrap(), Some(json!({"n": 1})));
        assert_eq!(store.keys().unwrap(), vec!["a", "b"]);
        assert_eq!(store.len().unwrap(), 2);

        store.del("a").unwrap();
        assert!(!store.has("a").unwrap());

        store.clear().unwrap();
        assert_eq!(store.len().unwrap(), 0);
    }
}

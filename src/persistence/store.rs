use crate::persistence::redb_store::{KeyValueStore, StoreError};
use crate::storage_keys;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{info, warn};

/// JSON view over the key-value store, scoped to one application prefix.
#[derive(Clone)]
pub struct AppDataStore {
    kv: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl AppDataStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, name: &str) -> String {
        storage_keys::namespaced(&self.prefix, name)
    }

    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        match self.kv.get(&self.key(name))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Loads a list collection; a missing key reads as empty.
    pub fn load_list<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, StoreError> {
        Ok(self.load::<Vec<T>>(name)?.unwrap_or_default())
    }

    pub fn save<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let data = serde_json::to_vec(value)?;
        self.kv.put(&self.key(name), &data)
    }

    pub fn remove(&self, name: &str) -> Result<bool, StoreError> {
        self.kv.remove(&self.key(name))
    }

    /// Every record under the prefix, keyed by its full namespaced key.
    pub fn export(&self) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
        let mut out = serde_json::Map::new();
        for key in self.kv.keys_with_prefix(&storage_keys::prefix_pattern(&self.prefix))? {
            if let Some(bytes) = self.kv.get(&key)? {
                let value = match serde_json::from_slice(&bytes) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(key = %key, "Exporting undecodable record as string: {}", e);
                        serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
                    }
                };
                out.insert(key, value);
            }
        }
        Ok(out)
    }

    /// Deletes every record under the prefix. Returns the number removed.
    pub fn wipe(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in self.kv.keys_with_prefix(&storage_keys::prefix_pattern(&self.prefix))? {
            if self.kv.remove(&key)? {
                removed += 1;
            }
        }
        info!(prefix = %self.prefix, removed, "Application data wiped");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::redb_store::MemoryStore;

    #[test]
    fn test_missing_list_reads_empty() {
        let store = AppDataStore::new(Arc::new(MemoryStore::new()), "@paytrack");
        let items: Vec<String> = store.load_list("transactions").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_export_and_wipe_respect_prefix() {
        let kv = Arc::new(MemoryStore::new());
        kv.put("@unrelated:key", b"\"keep\"").unwrap();
        let store = AppDataStore::new(kv.clone(), "@paytrack");
        store.save("transactions", &vec![1, 2, 3]).unwrap();
        store.save("preferred_external_app", "com.example.pay").unwrap();

        let exported = store.export().unwrap();
        assert_eq!(exported.len(), 2);
        assert_eq!(
            exported["@paytrack:transactions"],
            serde_json::json!([1, 2, 3])
        );

        assert_eq!(store.wipe().unwrap(), 2);
        assert!(store.export().unwrap().is_empty());
        assert!(kv.get("@unrelated:key").unwrap().is_some());
    }
}

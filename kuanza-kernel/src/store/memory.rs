use super::{Repository, StoreError, StoreInfo};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Process-local repository. Lost on restart.
pub struct MemoryRepository<V> {
    name: String,
    records: Mutex<HashMap<String, V>>,
}

impl<V> MemoryRepository<V> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone + Send + Sync> Repository<V> for MemoryRepository<V> {
    fn get(&self, key: &str) -> Result<Option<V>, StoreError> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: V) -> Result<(), StoreError> {
        self.records.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn update(&self, key: &str, apply: &mut dyn FnMut(Option<V>) -> V) -> Result<V, StoreError> {
        let mut records = self.records.lock();
        let next = apply(records.remove(key));
        records.insert(key.to_string(), next.clone());
        Ok(next)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.lock().keys().cloned().collect())
    }

    fn info(&self) -> StoreInfo {
        StoreInfo {
            name: self.name.clone(),
            backend: "memory".to_string(),
            records: self.records.lock().len(),
        }
    }
}

use super::{Repository, StoreError, StoreInfo};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Repository mirrored to `<dir>/<name>.json`.
///
/// Reads are served from the cache; every write rewrites the whole file
/// (temp file then rename) while the cache lock is held. A failed write
/// restores the previous cache entry, so the cache never holds a value the
/// file does not.
pub struct JsonFileRepository<V> {
    name: String,
    storage_path: PathBuf,
    cache: Mutex<HashMap<String, V>>,
}

impl<V: Serialize + DeserializeOwned> JsonFileRepository<V> {
    pub fn open(name: &str, dir: &Path) -> Result<Self, StoreError> {
        let storage_path = dir.join(format!("{name}.json"));
        let repo = Self {
            name: name.to_string(),
            storage_path,
            cache: Mutex::new(HashMap::new()),
        };
        repo.load_from_disk()?;
        tracing::debug!(store = name, path = ?repo.storage_path, "json store opened");
        Ok(repo)
    }

    fn load_from_disk(&self) -> Result<(), StoreError> {
        if !self.storage_path.exists() {
            fs::write(&self.storage_path, "{}")?;
        }
        let content = fs::read_to_string(&self.storage_path)?;
        let records: HashMap<String, V> = if content.trim().is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(&content)?
        };
        *self.cache.lock() = records;
        Ok(())
    }

    fn save(&self, records: &HashMap<String, V>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.storage_path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.storage_path)?;
        Ok(())
    }

    /// Inserts `value`, persists, and rolls the entry back if persisting fails.
    fn commit(
        &self,
        cache: &mut HashMap<String, V>,
        key: &str,
        value: V,
    ) -> Result<(), StoreError> {
        let previous = cache.insert(key.to_string(), value);
        if let Err(e) = self.save(cache) {
            match previous {
                Some(old) => {
                    cache.insert(key.to_string(), old);
                }
                None => {
                    cache.remove(key);
                }
            }
            tracing::error!(store = %self.name, key, error = %e, "json store write failed");
            return Err(e);
        }
        Ok(())
    }
}

impl<V> Repository<V> for JsonFileRepository<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    fn get(&self, key: &str) -> Result<Option<V>, StoreError> {
        Ok(self.cache.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: V) -> Result<(), StoreError> {
        let mut cache = self.cache.lock();
        self.commit(&mut cache, key, value)
    }

    fn update(&self, key: &str, apply: &mut dyn FnMut(Option<V>) -> V) -> Result<V, StoreError> {
        let mut cache = self.cache.lock();
        let next = apply(cache.get(key).cloned());
        self.commit(&mut cache, key, next.clone())?;
        Ok(next)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.cache.lock().keys().cloned().collect())
    }

    fn info(&self) -> StoreInfo {
        StoreInfo {
            name: self.name.clone(),
            backend: format!("json:{}", self.storage_path.display()),
            records: self.cache.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repo: JsonFileRepository<Vec<String>> =
                JsonFileRepository::open("queues", dir.path()).unwrap();
            repo.put("dev-1", vec!["a".into()]).unwrap();
            repo.update("dev-1", &mut |cur| {
                let mut v = cur.unwrap_or_default();
                v.push("b".into());
                v
            })
            .unwrap();
        }
        let reopened: JsonFileRepository<Vec<String>> =
            JsonFileRepository::open("queues", dir.path()).unwrap();
        assert_eq!(reopened.get("dev-1").unwrap(), Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(reopened.keys().unwrap(), vec!["dev-1".to_string()]);
    }

    #[test]
    fn failed_write_keeps_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir(&data).unwrap();
        let repo: JsonFileRepository<u32> = JsonFileRepository::open("counters", &data).unwrap();
        repo.put("k", 1).unwrap();

        fs::remove_dir_all(&data).unwrap();
        assert!(repo.update("k", &mut |_| 2).is_err());
        assert_eq!(repo.get("k").unwrap(), Some(1));

        assert!(repo.put("fresh", 7).is_err());
        assert_eq!(repo.get("fresh").unwrap(), None);
        assert_eq!(repo.keys().unwrap(), vec!["k".to_string()]);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let opened = JsonFileRepository::<u32>::open("broken", dir.path());
        assert!(matches!(opened, Err(StoreError::Serialization(_))));
    }
}

/**
 * DEVICE STORES - Per-device persistence behind one repository interface
 *
 * ROLE :
 * Every resilience component keeps its state keyed by device id: network
 * snapshots, buffered queues, sync trackers, failure logs, overrides.
 * This module defines the common `Repository` contract and the `Stores`
 * bundle that wires one repository per collection.
 *
 * HOW IT WORKS :
 * - `Repository<V>` = get / put / atomic update / keys, keyed by device id
 * - `MemoryRepository` for tests and ephemeral kernels
 * - `JsonFileRepository` keeps an in-memory cache mirrored to one JSON file
 * - `Stores::open(data_dir)` picks the backend from the kernel config
 *
 * `update` holds the repository's own lock for the whole read-modify-write,
 * which is what serialises concurrent enqueue / drain merges on a queue.
 */

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileRepository;
pub use memory::MemoryRepository;

use crate::buffer::BufferedItem;
use crate::failures::{NetworkFailureEvent, PowerFailureEvent};
use crate::fallback::SmsFallbackConfig;
use crate::maps::MapDownload;
use crate::network::NetworkStatus;
use crate::resilience::ResilienceConfig;
use crate::sync::{AbandonedItem, SyncTracker};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Descriptive metadata of a repository, surfaced by `/system/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub name: String,
    pub backend: String,
    pub records: usize,
}

pub trait Repository<V>: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<V>, StoreError>;

    fn put(&self, key: &str, value: V) -> Result<(), StoreError>;

    /// Atomic read-modify-write. `apply` receives the current value (if
    /// any) and returns the value to store, which is also returned.
    fn update(&self, key: &str, apply: &mut dyn FnMut(Option<V>) -> V) -> Result<V, StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    fn info(&self) -> StoreInfo;
}

pub type SharedRepository<V> = Arc<dyn Repository<V>>;

/// Appends to a per-device log held as a `Vec`.
pub fn append<V: Clone>(
    repo: &dyn Repository<Vec<V>>,
    key: &str,
    entry: V,
) -> Result<(), StoreError> {
    repo.update(key, &mut |current| {
        let mut log = current.unwrap_or_default();
        log.push(entry.clone());
        log
    })?;
    Ok(())
}

/// One repository per collection.
#[derive(Clone)]
pub struct Stores {
    pub network: SharedRepository<NetworkStatus>,
    pub buffers: SharedRepository<Vec<BufferedItem>>,
    pub trackers: SharedRepository<SyncTracker>,
    pub abandoned: SharedRepository<Vec<AbandonedItem>>,
    pub network_failures: SharedRepository<Vec<NetworkFailureEvent>>,
    pub power_failures: SharedRepository<Vec<PowerFailureEvent>>,
    pub resilience: SharedRepository<ResilienceConfig>,
    pub sms: SharedRepository<SmsFallbackConfig>,
    pub map_downloads: SharedRepository<Vec<MapDownload>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            network: Arc::new(MemoryRepository::new("network_status")),
            buffers: Arc::new(MemoryRepository::new("buffers")),
            trackers: Arc::new(MemoryRepository::new("sync_trackers")),
            abandoned: Arc::new(MemoryRepository::new("abandoned")),
            network_failures: Arc::new(MemoryRepository::new("network_failures")),
            power_failures: Arc::new(MemoryRepository::new("power_failures")),
            resilience: Arc::new(MemoryRepository::new("resilience_config")),
            sms: Arc::new(MemoryRepository::new("sms_fallback")),
            map_downloads: Arc::new(MemoryRepository::new("map_downloads")),
        }
    }

    /// JSON file repositories under `dir`, one file per collection.
    pub fn json_dir<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            network: Arc::new(JsonFileRepository::open("network_status", dir)?),
            buffers: Arc::new(JsonFileRepository::open("buffers", dir)?),
            trackers: Arc::new(JsonFileRepository::open("sync_trackers", dir)?),
            abandoned: Arc::new(JsonFileRepository::open("abandoned", dir)?),
            network_failures: Arc::new(JsonFileRepository::open("network_failures", dir)?),
            power_failures: Arc::new(JsonFileRepository::open("power_failures", dir)?),
            resilience: Arc::new(JsonFileRepository::open("resilience_config", dir)?),
            sms: Arc::new(JsonFileRepository::open("sms_fallback", dir)?),
            map_downloads: Arc::new(JsonFileRepository::open("map_downloads", dir)?),
        })
    }

    pub fn open(data_dir: Option<&Path>) -> Result<Self, StoreError> {
        match data_dir {
            Some(dir) => Self::json_dir(dir),
            None => Ok(Self::in_memory()),
        }
    }

    pub fn info(&self) -> Vec<StoreInfo> {
        vec![
            self.network.info(),
            self.buffers.info(),
            self.trackers.info(),
            self.abandoned.info(),
            self.network_failures.info(),
            self.power_failures.info(),
            self.resilience.info(),
            self.sms.info(),
            self.map_downloads.info(),
        ]
    }
}

use crate::maps::MapPackage;
use crate::resilience::ResilienceConfig;
use crate::sync::SyncSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub storage: StorageConf,
    pub sync: SyncConf,
    pub mqtt: MqttConf,
    pub resilience_defaults: ResilienceConfig,
    pub offline_maps: Vec<MapPackage>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    pub base_path: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into(), base_path: "/api/angola".into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConf {
    /// JSON file stores live here; in-memory when unset.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConf {
    pub item_timeout_ms: u64,
    /// 0 disables the auto-sync worker.
    pub auto_interval_secs: u64,
    pub max_backoff_secs: u64,
    pub dead_letter: bool,
}

impl Default for SyncConf {
    fn default() -> Self {
        Self {
            item_timeout_ms: 5_000,
            auto_interval_secs: 30,
            max_backoff_secs: 900,
            dead_letter: false,
        }
    }
}

impl SyncConf {
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            item_timeout: Duration::from_millis(self.item_timeout_ms.max(1)),
            auto_interval: Duration::from_secs(self.auto_interval_secs.max(1)),
            max_backoff: Duration::from_secs(
                self.max_backoff_secs.max(self.auto_interval_secs).max(1),
            ),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "kuanza-kernel".into(),
            topic_prefix: "kuanza".into(),
        }
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("KUANZA_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    load_config_from(Path::new(&path)).await
}

pub async fn load_config_from(path: &Path) -> KernelConfig {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "no kernel config file, using defaults");
        return KernelConfig::default();
    }
    let txt = match fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "unreadable kernel config, using defaults"
            );
            return KernelConfig::default();
        }
    };
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        tracing::error!(
            path = %path.display(),
            error = %e,
            "invalid kernel config, using defaults"
        );
        KernelConfig::default()
    })
}

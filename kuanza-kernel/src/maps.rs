//! Offline map packages that devices can pre-load before heading out of
//! coverage.

use crate::error::{ResilienceError, Result};
use crate::network::NetworkTracker;
use crate::store::{append, SharedRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapPackage {
    pub id: String,
    pub name: String,
    pub region: String,
    pub size_mb: f64,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Queued,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDownload {
    pub download_id: String,
    pub package_id: String,
    pub device_id: String,
    pub status: DownloadStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub estimated_seconds: Option<u64>,
}

pub fn default_catalogue() -> Vec<MapPackage> {
    let pkg = |id: &str, name: &str, region: &str, size_mb: f64| MapPackage {
        id: id.to_string(),
        name: name.to_string(),
        region: region.to_string(),
        size_mb,
        version: "2024.1".to_string(),
    };
    vec![
        pkg("luanda", "Luanda Metropolitan", "Luanda", 245.0),
        pkg("benguela", "Benguela & Lobito", "Benguela", 128.0),
        pkg("huambo", "Huambo Province", "Huambo", 96.0),
        pkg("lubango", "Lubango & Huíla", "Huíla", 110.0),
        pkg("cabinda", "Cabinda Enclave", "Cabinda", 64.0),
    ]
}

/// Seconds to fetch `size_mb` at `bandwidth_mbps`, if there is any bandwidth.
pub fn estimate_seconds(size_mb: f64, bandwidth_mbps: f64) -> Option<u64> {
    (bandwidth_mbps > 0.0).then(|| (size_mb * 8.0 / bandwidth_mbps).ceil() as u64)
}

#[derive(Clone)]
pub struct MapCatalogue {
    packages: Arc<Vec<MapPackage>>,
    downloads: SharedRepository<Vec<MapDownload>>,
    network: NetworkTracker,
}

impl MapCatalogue {
    pub fn new(
        packages: Vec<MapPackage>,
        downloads: SharedRepository<Vec<MapDownload>>,
        network: NetworkTracker,
    ) -> Self {
        let packages = if packages.is_empty() { default_catalogue() } else { packages };
        Self { packages: Arc::new(packages), downloads, network }
    }

    pub fn list(&self) -> &[MapPackage] {
        &self.packages
    }

    pub fn request_download(
        &self,
        device_id: &str,
        package_id: &str,
    ) -> Result<(MapPackage, MapDownload)> {
        let package = self
            .packages
            .iter()
            .find(|p| p.id == package_id)
            .cloned()
            .ok_or_else(|| ResilienceError::NotFound(format!("map package {package_id}")))?;
        let bandwidth = self.network.peek(device_id)?.map_or(0.0, |s| s.bandwidth_mbps);
        let download = MapDownload {
            download_id: Uuid::new_v4().to_string(),
            package_id: package.id.clone(),
            device_id: device_id.to_string(),
            status: DownloadStatus::Queued,
            requested_at: OffsetDateTime::now_utc(),
            estimated_seconds: estimate_seconds(package.size_mb, bandwidth),
        };
        append(self.downloads.as_ref(), device_id, download.clone())?;
        tracing::info!(device_id, package_id, "offline map download queued");
        Ok((package, download))
    }
}

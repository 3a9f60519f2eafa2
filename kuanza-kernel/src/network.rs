/**
 * NETWORK STATUS TRACKER - Last known connectivity of each field device
 *
 * ROLE :
 * Devices report their link quality (signal, latency, bandwidth, carrier).
 * The tracker keeps one snapshot per device, overwritten on every report,
 * and turns it into operator-facing recommendations.
 *
 * The sync processor reads the snapshot through `peek` so that an unseen
 * device stays "absent" instead of getting a synthesised record.
 */

use crate::error::{ResilienceError, Result};
use crate::store::SharedRepository;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    #[serde(rename = "4g")]
    FourG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "2g")]
    TwoG,
    None,
}

/// Angolan mobile carriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Unitel,
    Movicel,
    Africell,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub is_online: bool,
    pub connection_type: ConnectionType,
    pub signal_strength: u8,
    pub latency_ms: f64,
    pub bandwidth_mbps: f64,
    pub provider: Provider,
    #[serde(with = "time::serde::rfc3339")]
    pub last_check: OffsetDateTime,
}

impl NetworkStatus {
    pub fn offline(now: OffsetDateTime) -> Self {
        Self {
            is_online: false,
            connection_type: ConnectionType::None,
            signal_strength: 0,
            latency_ms: 0.0,
            bandwidth_mbps: 0.0,
            provider: Provider::Other,
            last_check: now,
        }
    }

    /// Threshold checks, in evaluation order.
    pub fn recommendations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.signal_strength < 30 {
            out.push(
                "Weak signal: move closer to a window or open area, or switch carrier".to_string(),
            );
        }
        if self.latency_ms > 2000.0 {
            out.push("High latency: defer large uploads and batch operations".to_string());
        }
        if self.bandwidth_mbps < 1.0 {
            out.push(
                "Low bandwidth: use offline mode and buffer operations for later sync".to_string(),
            );
        }
        if self.connection_type == ConnectionType::TwoG {
            out.push(
                "2G connection: limited functionality, only critical operations will sync"
                    .to_string(),
            );
        }
        out
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatusPatch {
    pub is_online: Option<bool>,
    pub connection_type: Option<ConnectionType>,
    pub signal_strength: Option<u8>,
    pub latency_ms: Option<f64>,
    pub bandwidth_mbps: Option<f64>,
    pub provider: Option<Provider>,
}

impl NetworkStatusPatch {
    pub fn validate(&self) -> Result<()> {
        if let Some(s) = self.signal_strength {
            if s > 100 {
                return Err(ResilienceError::Validation(format!(
                    "signalStrength must be within 0..=100, got {s}"
                )));
            }
        }
        let measured = [("latencyMs", self.latency_ms), ("bandwidthMbps", self.bandwidth_mbps)];
        for (field, value) in measured {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ResilienceError::Validation(format!(
                        "{field} must be a non-negative number, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn apply(&self, status: &mut NetworkStatus) {
        if let Some(v) = self.is_online {
            status.is_online = v;
        }
        if let Some(v) = self.connection_type {
            status.connection_type = v;
        }
        if let Some(v) = self.signal_strength {
            status.signal_strength = v;
        }
        if let Some(v) = self.latency_ms {
            status.latency_ms = v;
        }
        if let Some(v) = self.bandwidth_mbps {
            status.bandwidth_mbps = v;
        }
        if let Some(v) = self.provider {
            status.provider = v;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde(flatten)]
    pub status: NetworkStatus,
    pub recommendations: Vec<String>,
}

#[derive(Clone)]
pub struct NetworkTracker {
    repo: SharedRepository<NetworkStatus>,
}

impl NetworkTracker {
    pub fn new(repo: SharedRepository<NetworkStatus>) -> Self {
        Self { repo }
    }

    /// Last known status without synthesising a default.
    pub fn peek(&self, device_id: &str) -> Result<Option<NetworkStatus>> {
        Ok(self.repo.get(device_id)?)
    }

    /// Last known status; an unseen device gets an offline record which is
    /// persisted so later reads return the same snapshot.
    pub fn get_status(&self, device_id: &str) -> Result<NetworkStatus> {
        if let Some(status) = self.repo.get(device_id)? {
            return Ok(status);
        }
        let status = self.repo.update(device_id, &mut |current| {
            current.unwrap_or_else(|| NetworkStatus::offline(OffsetDateTime::now_utc()))
        })?;
        tracing::debug!(device_id, "network status initialised offline");
        Ok(status)
    }

    pub fn update_status(
        &self,
        device_id: &str,
        patch: &NetworkStatusPatch,
    ) -> Result<StatusUpdate> {
        patch.validate()?;
        let status = self.repo.update(device_id, &mut |current| {
            let now = OffsetDateTime::now_utc();
            let mut status = current.unwrap_or_else(|| NetworkStatus::offline(now));
            patch.apply(&mut status);
            status.last_check = now;
            status
        })?;
        let recommendations = status.recommendations();
        tracing::info!(
            device_id,
            online = status.is_online,
            signal = status.signal_strength,
            warnings = recommendations.len(),
            "network status updated"
        );
        Ok(StatusUpdate { status, recommendations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRepository;
    use std::sync::Arc;

    fn tracker() -> NetworkTracker {
        NetworkTracker::new(Arc::new(MemoryRepository::new("network")))
    }

    #[test]
    fn unseen_device_read_is_stable() {
        let t = tracker();
        assert!(t.peek("dev-1").unwrap().is_none());
        let first = t.get_status("dev-1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = t.get_status("dev-1").unwrap();
        assert!(!first.is_online);
        assert_eq!(first.connection_type, ConnectionType::None);
        assert_eq!(first, second);
        assert!(t.peek("dev-1").unwrap().is_some());
    }

    #[test]
    fn update_merges_partial_fields() {
        let t = tracker();
        let patch = NetworkStatusPatch {
            is_online: Some(true),
            connection_type: Some(ConnectionType::FourG),
            signal_strength: Some(80),
            bandwidth_mbps: Some(12.0),
            provider: Some(Provider::Unitel),
            ..Default::default()
        };
        t.update_status("dev-1", &patch).unwrap();
        let latency = NetworkStatusPatch { latency_ms: Some(120.0), ..Default::default() };
        let update = t.update_status("dev-1", &latency).unwrap();
        assert!(update.status.is_online);
        assert_eq!(update.status.provider, Provider::Unitel);
        assert_eq!(update.status.latency_ms, 120.0);
        assert!(update.recommendations.is_empty());
    }

    #[test]
    fn recommendations_fire_in_order() {
        let t = tracker();
        let patch = NetworkStatusPatch {
            is_online: Some(true),
            connection_type: Some(ConnectionType::TwoG),
            signal_strength: Some(10),
            latency_ms: Some(2500.0),
            bandwidth_mbps: Some(0.2),
            provider: Some(Provider::Movicel),
        };
        let recs = t.update_status("dev-1", &patch).unwrap().recommendations;
        assert_eq!(recs.len(), 4);
        assert!(recs[0].starts_with("Weak signal"));
        assert!(recs[1].starts_with("High latency"));
        assert!(recs[2].starts_with("Low bandwidth"));
        assert!(recs[3].starts_with("2G connection"));
    }

    #[test]
    fn out_of_range_signal_is_rejected() {
        let t = tracker();
        let patch = NetworkStatusPatch { signal_strength: Some(140), ..Default::default() };
        assert!(matches!(t.update_status("dev-1", &patch), Err(ResilienceError::Validation(_))));
        assert!(t.peek("dev-1").unwrap().is_none());
    }

    #[test]
    fn wire_names_match_the_api() {
        let status = NetworkStatus::offline(OffsetDateTime::UNIX_EPOCH);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["isOnline"], false);
        assert_eq!(json["connectionType"], "none");
        assert_eq!(json["lastCheck"], "1970-01-01T00:00:00Z");
        let patch: NetworkStatusPatch = serde_json::from_value(serde_json::json!({
            "connectionType": "3g",
            "provider": "africell"
        }))
        .unwrap();
        assert_eq!(patch.connection_type, Some(ConnectionType::ThreeG));
        assert_eq!(patch.provider, Some(Provider::Africell));
    }
}

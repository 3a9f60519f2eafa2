//! Append-only logs of network and power failures reported by devices.

use crate::error::{ResilienceError, Result};
use crate::resilience::ResilienceStore;
use crate::store::{append, SharedRepository};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Assumed time to recover once the fallback channel kicks in.
pub const RECOVERY_OFFSET_MS: i64 = 15_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFailureEvent {
    pub id: String,
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub duration_ms: u64,
    pub affected_operations: Vec<String>,
    pub fallback_used: bool,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub recovery_time: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerFailureEvent {
    pub id: String,
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub battery_level_percent: u8,
    pub critical_operations_protected: Vec<String>,
    pub auto_shutdown_triggered: bool,
}

#[derive(Clone)]
pub struct FailureRecorder {
    network_log: SharedRepository<Vec<NetworkFailureEvent>>,
    power_log: SharedRepository<Vec<PowerFailureEvent>>,
    resilience: ResilienceStore,
}

impl FailureRecorder {
    pub fn new(
        network_log: SharedRepository<Vec<NetworkFailureEvent>>,
        power_log: SharedRepository<Vec<PowerFailureEvent>>,
        resilience: ResilienceStore,
    ) -> Self {
        Self { network_log, power_log, resilience }
    }

    pub fn record_network_failure(
        &self,
        device_id: &str,
        duration_ms: u64,
        affected_operations: Vec<String>,
    ) -> Result<NetworkFailureEvent> {
        let threshold = self.resilience.get(device_id)?.network_failure_max_duration_ms;
        let timestamp = OffsetDateTime::now_utc();
        let fallback_used = duration_ms > threshold;
        let event = NetworkFailureEvent {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            timestamp,
            duration_ms,
            affected_operations,
            fallback_used,
            recovery_time: fallback_used
                .then(|| timestamp + time::Duration::milliseconds(RECOVERY_OFFSET_MS)),
        };
        append(self.network_log.as_ref(), device_id, event.clone())?;
        if fallback_used {
            tracing::warn!(
                device_id,
                duration_ms,
                threshold,
                "network failure beyond threshold, fallback engaged"
            );
        } else {
            tracing::info!(device_id, duration_ms, "network failure recorded");
        }
        Ok(event)
    }

    pub fn record_power_failure(
        &self,
        device_id: &str,
        battery_level: u8,
        critical_operations: Vec<String>,
    ) -> Result<PowerFailureEvent> {
        if battery_level > 100 {
            return Err(ResilienceError::Validation(format!(
                "batteryLevel must be within 0..=100, got {battery_level}"
            )));
        }
        let critical = self.resilience.get(device_id)?.critical_battery_level;
        let event = PowerFailureEvent {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            timestamp: OffsetDateTime::now_utc(),
            battery_level_percent: battery_level,
            critical_operations_protected: critical_operations,
            auto_shutdown_triggered: battery_level < critical,
        };
        append(self.power_log.as_ref(), device_id, event.clone())?;
        tracing::info!(
            device_id,
            battery_level,
            shutdown = event.auto_shutdown_triggered,
            "power failure recorded"
        );
        Ok(event)
    }

    pub fn network_failures(&self, device_id: &str) -> Result<Vec<NetworkFailureEvent>> {
        Ok(self.network_log.get(device_id)?.unwrap_or_default())
    }

    pub fn power_failures(&self, device_id: &str) -> Result<Vec<PowerFailureEvent>> {
        Ok(self.power_log.get(device_id)?.unwrap_or_default())
    }
}

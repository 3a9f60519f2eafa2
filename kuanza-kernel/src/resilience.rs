//! Per-device resilience tunables.
//!
//! The default record comes from the kernel configuration and is shared
//! behind an `Arc`; device overrides are created lazily by merging a patch
//! over a copy of it.

use crate::error::{ResilienceError, Result};
use crate::store::SharedRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_RECORD_ID: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResilienceConfig {
    pub network_failure_max_duration_ms: u64,
    pub power_failure_auto_save: bool,
    pub critical_battery_level: u8,
    pub auto_retry_max_attempts: u32,
    pub retry_backoff_multiplier: f64,
    pub sms_credits: u32,
    pub ussd_credits: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            network_failure_max_duration_ms: 30_000,
            power_failure_auto_save: true,
            critical_battery_level: 15,
            auto_retry_max_attempts: 5,
            retry_backoff_multiplier: 2.0,
            sms_credits: 100,
            ussd_credits: 100,
        }
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResilienceConfigPatch {
    pub network_failure_max_duration_ms: Option<u64>,
    pub power_failure_auto_save: Option<bool>,
    pub critical_battery_level: Option<u8>,
    pub auto_retry_max_attempts: Option<u32>,
    pub retry_backoff_multiplier: Option<f64>,
    pub sms_credits: Option<u32>,
    pub ussd_credits: Option<u32>,
}

impl ResilienceConfigPatch {
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = self.critical_battery_level {
            if level > 100 {
                return Err(ResilienceError::Validation(format!(
                    "criticalBatteryLevel must be within 0..=100, got {level}"
                )));
            }
        }
        if let Some(m) = self.retry_backoff_multiplier {
            if !m.is_finite() || m < 1.0 {
                return Err(ResilienceError::Validation(format!(
                    "retryBackoffMultiplier must be >= 1, got {m}"
                )));
            }
        }
        Ok(())
    }

    fn apply(&self, base: &mut ResilienceConfig) {
        if let Some(v) = self.network_failure_max_duration_ms {
            base.network_failure_max_duration_ms = v;
        }
        if let Some(v) = self.power_failure_auto_save {
            base.power_failure_auto_save = v;
        }
        if let Some(v) = self.critical_battery_level {
            base.critical_battery_level = v;
        }
        if let Some(v) = self.auto_retry_max_attempts {
            base.auto_retry_max_attempts = v;
        }
        if let Some(v) = self.retry_backoff_multiplier {
            base.retry_backoff_multiplier = v;
        }
        if let Some(v) = self.sms_credits {
            base.sms_credits = v;
        }
        if let Some(v) = self.ussd_credits {
            base.ussd_credits = v;
        }
    }
}

#[derive(Clone)]
pub struct ResilienceStore {
    defaults: Arc<ResilienceConfig>,
    overrides: SharedRepository<ResilienceConfig>,
}

impl ResilienceStore {
    pub fn new(defaults: ResilienceConfig, overrides: SharedRepository<ResilienceConfig>) -> Self {
        Self { defaults: Arc::new(defaults), overrides }
    }

    pub fn defaults(&self) -> &ResilienceConfig {
        &self.defaults
    }

    /// Device override, or a copy of the default record.
    pub fn get(&self, device_id: &str) -> Result<ResilienceConfig> {
        Ok(self
            .overrides
            .get(device_id)?
            .unwrap_or_else(|| (*self.defaults).clone()))
    }

    pub fn has_override(&self, device_id: &str) -> Result<bool> {
        Ok(self.overrides.get(device_id)?.is_some())
    }

    pub fn update(
        &self,
        device_id: &str,
        patch: &ResilienceConfigPatch,
    ) -> Result<ResilienceConfig> {
        if device_id == DEFAULT_RECORD_ID {
            return Err(ResilienceError::Validation(
                "the default resilience record is read-only".into(),
            ));
        }
        patch.validate()?;
        let updated = self.overrides.update(device_id, &mut |current| {
            let mut cfg = current.unwrap_or_else(|| (*self.defaults).clone());
            patch.apply(&mut cfg);
            cfg
        })?;
        tracing::info!(device_id, "resilience config updated");
        Ok(updated)
    }

    /// Takes one SMS credit, writing the decrement to the device override.
    /// Returns the remaining credits. An exhausted device is left untouched.
    pub fn consume_sms_credit(&self, device_id: &str) -> Result<u32> {
        let exhausted_err = || ResilienceError::InsufficientCredits {
            device_id: device_id.to_string(),
            channel: "sms",
        };
        if self.get(device_id)?.sms_credits == 0 {
            return Err(exhausted_err());
        }
        let mut exhausted = false;
        let cfg = self.overrides.update(device_id, &mut |current| {
            let mut cfg = current.unwrap_or_else(|| (*self.defaults).clone());
            match cfg.sms_credits.checked_sub(1) {
                Some(left) => cfg.sms_credits = left,
                None => exhausted = true,
            }
            cfg
        })?;
        if exhausted {
            return Err(exhausted_err());
        }
        Ok(cfg.sms_credits)
    }

    pub fn refund_sms_credit(&self, device_id: &str) -> Result<u32> {
        let cfg = self.overrides.update(device_id, &mut |current| {
            let mut cfg = current.unwrap_or_else(|| (*self.defaults).clone());
            cfg.sms_credits = cfg.sms_credits.saturating_add(1);
            cfg
        })?;
        Ok(cfg.sms_credits)
    }
}

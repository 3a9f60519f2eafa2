/**
 * DELAYED SYNC PROCESSOR - Drains local buffers once a device is reachable
 *
 * ROLE :
 * Replays buffered operations against the upstream collaborator in
 * priority order, applies the bounded retry policy and keeps the per-device
 * sync tracker (success rate, last sync, backoff state).
 *
 * HOW IT WORKS :
 * - one drain at a time per device (async mutex held for the whole pass)
 * - the pass works on a snapshot: items buffered meanwhile are merged back
 *   untouched and wait for the next pass
 * - every attempt is bounded by `item_timeout`
 * - an item failing more than `max_retries` times is abandoned and handed
 *   to the `AbandonHook`
 *
 * An auto-sync worker repeats non-forced drains for online devices, spacing
 * them with the device's `retryBackoffMultiplier` after failed passes.
 */

use crate::buffer::{sort_queue, BufferQueue, BufferedItem, SyncQueueStats};
use crate::error::{ResilienceError, Result};
use crate::network::NetworkTracker;
use crate::state::KeyedLocks;
use crate::store::{append, SharedRepository};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncFailure {
    #[error("rejected by upstream: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Upstream collaborator that accepts buffered operations.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    async fn push(
        &self,
        device_id: &str,
        item: &BufferedItem,
    ) -> std::result::Result<(), SyncFailure>;
}

/// Called once for every item dropped after exhausting its retries.
pub trait AbandonHook: Send + Sync {
    fn on_item_abandoned(&self, device_id: &str, item: &BufferedItem, reason: &SyncFailure);
}

/// Logs abandoned items and keeps nothing.
pub struct LogAbandoned;

impl AbandonHook for LogAbandoned {
    fn on_item_abandoned(&self, device_id: &str, item: &BufferedItem, reason: &SyncFailure) {
        tracing::warn!(
            device_id,
            item_id = %item.id,
            retries = item.retry_count,
            %reason,
            "buffered item abandoned after max retries"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbandonedItem {
    pub item: BufferedItem,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub abandoned_at: OffsetDateTime,
}

/// Logs, then keeps a dead-letter record per device for operators.
pub struct DeadLetter {
    repo: SharedRepository<Vec<AbandonedItem>>,
}

impl DeadLetter {
    pub fn new(repo: SharedRepository<Vec<AbandonedItem>>) -> Self {
        Self { repo }
    }
}

impl AbandonHook for DeadLetter {
    fn on_item_abandoned(&self, device_id: &str, item: &BufferedItem, reason: &SyncFailure) {
        LogAbandoned.on_item_abandoned(device_id, item, reason);
        let record = AbandonedItem {
            item: item.clone(),
            reason: reason.to_string(),
            abandoned_at: OffsetDateTime::now_utc(),
        };
        if let Err(e) = append(self.repo.as_ref(), device_id, record) {
            tracing::error!(
                device_id,
                item_id = %item.id,
                error = %e,
                "failed to store dead letter"
            );
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTracker {
    pub success_rate: f64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_successful_sync: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_attempt: Option<OffsetDateTime>,
    pub consecutive_failed_passes: u32,
}

impl Default for SyncTracker {
    fn default() -> Self {
        Self {
            success_rate: 100.0,
            last_successful_sync: None,
            last_attempt: None,
            consecutive_failed_passes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub items_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub next_sync_after_ms: u64,
    pub sync_stats: SyncQueueStats,
}

/// `base * multiplier ^ failed_passes`, capped.
pub fn backoff_delay(
    base: Duration,
    multiplier: f64,
    failed_passes: u32,
    cap: Duration,
) -> Duration {
    let factor = multiplier.max(1.0).powi(failed_passes.min(32) as i32);
    let millis = base.as_millis() as f64 * factor;
    if !millis.is_finite() || millis >= cap.as_millis() as f64 {
        cap
    } else {
        Duration::from_millis(millis as u64)
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub item_timeout: Duration,
    pub auto_interval: Duration,
    pub max_backoff: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            item_timeout: Duration::from_millis(5_000),
            auto_interval: Duration::from_secs(30),
            max_backoff: Duration::from_secs(900),
        }
    }
}

enum Outcome {
    Synced,
    Retry(BufferedItem),
    Abandon(BufferedItem, SyncFailure),
}

#[derive(Clone)]
pub struct SyncProcessor {
    queue: BufferQueue,
    network: NetworkTracker,
    target: Arc<dyn SyncTarget>,
    hook: Arc<dyn AbandonHook>,
    abandoned: SharedRepository<Vec<AbandonedItem>>,
    drains: KeyedLocks<tokio::sync::Mutex<()>>,
    settings: SyncSettings,
}

impl SyncProcessor {
    pub fn new(
        queue: BufferQueue,
        network: NetworkTracker,
        target: Arc<dyn SyncTarget>,
        hook: Arc<dyn AbandonHook>,
        abandoned: SharedRepository<Vec<AbandonedItem>>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            queue,
            network,
            target,
            hook,
            abandoned,
            drains: KeyedLocks::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub async fn process_sync(&self, device_id: &str, force: bool) -> Result<SyncReport> {
        let drain = self.drains.get(device_id);
        let _guard = drain.lock().await;

        if !force {
            let online = self.network.peek(device_id)?.is_some_and(|s| s.is_online);
            if !online {
                tracing::warn!(device_id, "sync refused: device offline and not forced");
                return Err(ResilienceError::NetworkUnavailable {
                    device_id: device_id.to_string(),
                });
            }
        }

        let snapshot = self.queue.pending(device_id)?;
        let mut outcomes: HashMap<String, Outcome> = HashMap::with_capacity(snapshot.len());
        let (mut successful, mut failed) = (0usize, 0usize);

        for item in &snapshot {
            let push = self.target.push(device_id, item);
            let attempt = tokio::time::timeout(self.settings.item_timeout, push).await;
            let result = match attempt {
                Ok(r) => r,
                Err(_) => Err(SyncFailure::Timeout(self.settings.item_timeout)),
            };
            match result {
                Ok(()) => {
                    successful += 1;
                    outcomes.insert(item.id.clone(), Outcome::Synced);
                }
                Err(reason) => {
                    failed += 1;
                    let mut retried = item.clone();
                    retried.retry_count += 1;
                    tracing::debug!(
                        device_id,
                        item_id = %item.id,
                        attempt = retried.retry_count,
                        %reason,
                        "buffered item sync failed"
                    );
                    let outcome = if retried.retry_count > retried.max_retries {
                        retried.retry_count = retried.max_retries;
                        Outcome::Abandon(retried, reason)
                    } else {
                        Outcome::Retry(retried)
                    };
                    outcomes.insert(item.id.clone(), outcome);
                }
            }
        }

        let snapshot_ids: HashSet<&str> = snapshot.iter().map(|i| i.id.as_str()).collect();
        let retained = self.queue.queues().update(device_id, &mut |current| {
            let mut merged: Vec<BufferedItem> = current
                .unwrap_or_default()
                .into_iter()
                .filter_map(|item| {
                    if !snapshot_ids.contains(item.id.as_str()) {
                        return Some(item);
                    }
                    match outcomes.get(&item.id) {
                        Some(Outcome::Retry(updated)) => Some(updated.clone()),
                        Some(Outcome::Synced) | Some(Outcome::Abandon(..)) => None,
                        None => Some(item),
                    }
                })
                .collect();
            sort_queue(&mut merged);
            merged
        })?;

        let mut abandoned = 0;
        for original in &snapshot {
            if let Some(Outcome::Abandon(item, reason)) = outcomes.get(&original.id) {
                abandoned += 1;
                self.hook.on_item_abandoned(device_id, item, reason);
            }
        }

        let now = OffsetDateTime::now_utc();
        let attempted = successful + failed;
        let tracker = self.queue.trackers().update(device_id, &mut |current| {
            let mut t = current.unwrap_or_default();
            t.success_rate = if attempted == 0 {
                100.0
            } else {
                successful as f64 / attempted as f64 * 100.0
            };
            t.last_successful_sync = Some(now);
            t.last_attempt = Some(now);
            t.consecutive_failed_passes = if failed > 0 && successful == 0 {
                t.consecutive_failed_passes.saturating_add(1)
            } else {
                0
            };
            t
        })?;

        let multiplier = self.queue.resilience().get(device_id)?.retry_backoff_multiplier;
        let next = backoff_delay(
            self.settings.auto_interval,
            multiplier,
            tracker.consecutive_failed_passes,
            self.settings.max_backoff,
        );

        tracing::info!(
            device_id,
            processed = snapshot.len(),
            successful,
            failed,
            abandoned,
            pending = retained.len(),
            forced = force,
            "sync pass finished"
        );

        Ok(SyncReport {
            items_processed: snapshot.len(),
            successful,
            failed,
            abandoned,
            next_sync_after_ms: next.as_millis() as u64,
            sync_stats: SyncQueueStats::compute(&retained, &tracker, now),
        })
    }

    pub fn abandoned(&self, device_id: &str) -> Result<Vec<AbandonedItem>> {
        Ok(self.abandoned.get(device_id)?.unwrap_or_default())
    }

    /// Whether the auto-sync worker should drain this device now.
    fn due(&self, device_id: &str, now: OffsetDateTime) -> Result<bool> {
        if self.queue.pending(device_id)?.is_empty() {
            return Ok(false);
        }
        if !self.network.peek(device_id)?.is_some_and(|s| s.is_online) {
            return Ok(false);
        }
        let tracker = self.queue.tracker(device_id)?;
        let Some(last) = tracker.last_attempt else { return Ok(true) };
        let multiplier = self.queue.resilience().get(device_id)?.retry_backoff_multiplier;
        let wait = backoff_delay(
            self.settings.auto_interval,
            multiplier,
            tracker.consecutive_failed_passes,
            self.settings.max_backoff,
        );
        Ok(now - last >= wait)
    }

    /// One sweep of the auto-sync worker. Returns the devices drained.
    pub async fn auto_sync_once(&self) -> Vec<String> {
        let devices = match self.queue.devices() {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "auto-sync could not list devices");
                return Vec::new();
            }
        };
        let now = OffsetDateTime::now_utc();
        let mut drained = Vec::new();
        for device_id in devices {
            match self.due(&device_id, now) {
                Ok(true) => match self.process_sync(&device_id, false).await {
                    Ok(_) => drained.push(device_id),
                    Err(e) => tracing::warn!(
                        device_id = %device_id,
                        op = "auto_sync",
                        error = %e,
                        "auto-sync failed"
                    ),
                },
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    device_id = %device_id,
                    op = "auto_sync",
                    error = %e,
                    "auto-sync check failed"
                ),
            }
        }
        drained
    }

    pub fn spawn_auto_sync(self) {
        let interval = self.settings.auto_interval;
        tracing::info!(interval_secs = interval.as_secs(), "starting auto-sync worker");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let drained = self.auto_sync_once().await;
                if !drained.is_empty() {
                    tracing::debug!(devices = drained.len(), "auto-sync sweep done");
                }
            }
        });
    }
}

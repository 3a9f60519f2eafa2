//! Local buffer queue: operations captured while a device is degraded,
//! waiting for the delayed sync processor.

use crate::error::{ResilienceError, Result};
use crate::resilience::ResilienceStore;
use crate::store::SharedRepository;
use crate::sync::SyncTracker;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferType {
    Critical,
    Normal,
    LowPriority,
}

impl BufferType {
    pub fn default_priority(self) -> i64 {
        match self {
            Self::Critical => 10,
            Self::Normal => 5,
            Self::LowPriority => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferedItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: BufferType,
    pub payload: serde_json::Value,
    pub size_bytes: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
    pub device_id: String,
    pub sync_priority: i64,
    pub retry_count: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enqueued {
    #[serde(flatten)]
    pub item: BufferedItem,
    pub queue_position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueStats {
    pub total_pending: usize,
    pub critical_items: usize,
    pub normal_items: usize,
    pub low_priority_items: usize,
    /// Mean time already spent in the queue, in milliseconds.
    pub average_wait_time: f64,
    pub success_rate: f64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_successful_sync: Option<OffsetDateTime>,
}

impl SyncQueueStats {
    pub fn compute(items: &[BufferedItem], tracker: &SyncTracker, now: OffsetDateTime) -> Self {
        let count = |t: BufferType| items.iter().filter(|i| i.item_type == t).count();
        let average_wait_time = if items.is_empty() {
            0.0
        } else {
            let total: i128 = items
                .iter()
                .map(|i| (now - i.enqueued_at).whole_milliseconds().max(0))
                .sum();
            total as f64 / items.len() as f64
        };
        Self {
            total_pending: items.len(),
            critical_items: count(BufferType::Critical),
            normal_items: count(BufferType::Normal),
            low_priority_items: count(BufferType::LowPriority),
            average_wait_time,
            success_rate: tracker.success_rate,
            last_successful_sync: tracker.last_successful_sync,
        }
    }
}

/// Descending by priority. `sort_by` is stable, so equal priorities keep
/// insertion order.
pub fn sort_queue(items: &mut [BufferedItem]) {
    items.sort_by(|a, b| b.sync_priority.cmp(&a.sync_priority));
}

#[derive(Clone)]
pub struct BufferQueue {
    queues: SharedRepository<Vec<BufferedItem>>,
    trackers: SharedRepository<SyncTracker>,
    resilience: ResilienceStore,
}

impl BufferQueue {
    pub fn new(
        queues: SharedRepository<Vec<BufferedItem>>,
        trackers: SharedRepository<SyncTracker>,
        resilience: ResilienceStore,
    ) -> Self {
        Self { queues, trackers, resilience }
    }

    pub fn enqueue(
        &self,
        device_id: &str,
        item_type: BufferType,
        payload: serde_json::Value,
        priority: Option<i64>,
    ) -> Result<Enqueued> {
        if device_id.trim().is_empty() {
            return Err(ResilienceError::Validation("deviceId is required".into()));
        }
        let size_bytes = serde_json::to_vec(&payload)
            .map_err(|e| ResilienceError::Validation(format!("payload is not serialisable: {e}")))?
            .len();
        let max_retries = self.resilience.get(device_id)?.auto_retry_max_attempts;
        let item = BufferedItem {
            id: Uuid::new_v4().to_string(),
            item_type,
            payload,
            size_bytes,
            enqueued_at: OffsetDateTime::now_utc(),
            device_id: device_id.to_string(),
            sync_priority: priority.unwrap_or_else(|| item_type.default_priority()),
            retry_count: 0,
            max_retries,
        };

        let mut position = 0;
        self.queues.update(device_id, &mut |current| {
            let mut queue = current.unwrap_or_default();
            queue.push(item.clone());
            sort_queue(&mut queue);
            position = queue.iter().position(|i| i.id == item.id).map_or(queue.len(), |p| p + 1);
            queue
        })?;

        tracing::info!(
            device_id,
            item_id = %item.id,
            priority = item.sync_priority,
            queue_position = position,
            "item buffered"
        );
        Ok(Enqueued { item, queue_position: position })
    }

    pub fn pending(&self, device_id: &str) -> Result<Vec<BufferedItem>> {
        Ok(self.queues.get(device_id)?.unwrap_or_default())
    }

    pub fn tracker(&self, device_id: &str) -> Result<SyncTracker> {
        Ok(self.trackers.get(device_id)?.unwrap_or_default())
    }

    pub fn stats(&self, device_id: &str) -> Result<SyncQueueStats> {
        let items = self.pending(device_id)?;
        let tracker = self.tracker(device_id)?;
        Ok(SyncQueueStats::compute(&items, &tracker, OffsetDateTime::now_utc()))
    }

    pub fn devices(&self) -> Result<Vec<String>> {
        Ok(self.queues.keys()?)
    }

    pub fn total_pending(&self) -> Result<usize> {
        let mut total = 0;
        for device in self.queues.keys()? {
            total += self.queues.get(&device)?.map_or(0, |q| q.len());
        }
        Ok(total)
    }

    pub(crate) fn queues(&self) -> &SharedRepository<Vec<BufferedItem>> {
        &self.queues
    }

    pub(crate) fn trackers(&self) -> &SharedRepository<SyncTracker> {
        &self.trackers
    }

    pub(crate) fn resilience(&self) -> &ResilienceStore {
        &self.resilience
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{ResilienceConfig, ResilienceConfigPatch};
    use crate::store::MemoryRepository;
    use serde_json::json;
    use std::sync::Arc;

    fn queue() -> BufferQueue {
        let resilience = ResilienceStore::new(
            ResilienceConfig::default(),
            Arc::new(MemoryRepository::new("resilience")),
        );
        BufferQueue::new(
            Arc::new(MemoryRepository::new("buffers")),
            Arc::new(MemoryRepository::new("trackers")),
            resilience,
        )
    }

    #[test]
    fn enqueue_sorts_by_priority_and_reports_position() {
        let q = queue();
        let a = q.enqueue("dev-1", BufferType::Normal, json!({"n": "a"}), Some(5)).unwrap();
        let b = q.enqueue("dev-1", BufferType::Critical, json!({"n": "b"}), Some(9)).unwrap();
        let c = q.enqueue("dev-1", BufferType::Normal, json!({"n": "c"}), Some(5)).unwrap();
        let d = q.enqueue("dev-1", BufferType::LowPriority, json!({"n": "d"}), Some(1)).unwrap();
        assert_eq!(a.queue_position, 1);
        assert_eq!(b.queue_position, 1);
        assert_eq!(c.queue_position, 3);
        assert_eq!(d.queue_position, 4);

        let names: Vec<_> = q
            .pending("dev-1")
            .unwrap()
            .iter()
            .map(|i| i.payload["n"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["b", "a", "c", "d"]);
    }

    #[test]
    fn new_item_defaults() {
        let q = queue();
        let e = q.enqueue("dev-1", BufferType::Critical, json!({"pod": "TRK-1"}), None).unwrap();
        assert_eq!(e.item.sync_priority, 10);
        assert_eq!(e.item.retry_count, 0);
        assert_eq!(e.item.max_retries, 5);
        assert_eq!(e.item.size_bytes, br#"{"pod":"TRK-1"}"#.len());
        assert_eq!(e.item.device_id, "dev-1");
    }

    #[test]
    fn max_retries_follows_device_config() {
        let q = queue();
        let patch =
            ResilienceConfigPatch { auto_retry_max_attempts: Some(2), ..Default::default() };
        q.resilience().update("dev-1", &patch).unwrap();
        let e = q.enqueue("dev-1", BufferType::Normal, json!(null), None).unwrap();
        assert_eq!(e.item.max_retries, 2);
    }

    #[test]
    fn queues_are_per_device() {
        let q = queue();
        q.enqueue("dev-1", BufferType::Normal, json!(1), None).unwrap();
        q.enqueue("dev-2", BufferType::Normal, json!(2), None).unwrap();
        q.enqueue("dev-2", BufferType::Normal, json!(3), None).unwrap();
        assert_eq!(q.pending("dev-1").unwrap().len(), 1);
        assert_eq!(q.pending("dev-2").unwrap().len(), 2);
        assert_eq!(q.total_pending().unwrap(), 3);
    }

    #[test]
    fn stats_count_each_type() {
        let q = queue();
        for t in [
            BufferType::Critical,
            BufferType::Critical,
            BufferType::Normal,
            BufferType::Normal,
            BufferType::Normal,
            BufferType::LowPriority,
        ] {
            q.enqueue("dev-1", t, json!({}), None).unwrap();
        }
        let stats = q.stats("dev-1").unwrap();
        assert_eq!(stats.total_pending, 6);
        assert_eq!((stats.critical_items, stats.normal_items, stats.low_priority_items), (2, 3, 1));
        assert!(stats.average_wait_time >= 0.0);
        assert_eq!(stats.success_rate, 100.0);
        assert!(stats.last_successful_sync.is_none());
    }

    #[test]
    fn empty_queue_has_zero_wait() {
        let q = queue();
        let stats = q.stats("nobody").unwrap();
        assert_eq!(stats.total_pending, 0);
        assert_eq!(stats.average_wait_time, 0.0);
    }

    #[test]
    fn blank_device_is_rejected() {
        let q = queue();
        assert!(matches!(
            q.enqueue(" ", BufferType::Normal, json!({}), None),
            Err(ResilienceError::Validation(_))
        ));
    }

    #[test]
    fn wait_time_is_averaged() {
        let now = OffsetDateTime::now_utc();
        let item = |ms: i64| BufferedItem {
            id: Uuid::new_v4().to_string(),
            item_type: BufferType::Normal,
            payload: json!({}),
            size_bytes: 2,
            enqueued_at: now - time::Duration::milliseconds(ms),
            device_id: "dev-1".into(),
            sync_priority: 5,
            retry_count: 0,
            max_retries: 5,
        };
        let items = [item(1000), item(3000)];
        let stats = SyncQueueStats::compute(&items, &SyncTracker::default(), now);
        assert_eq!(stats.average_wait_time, 2000.0);
    }
}

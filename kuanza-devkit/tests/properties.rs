//! Cross-component behaviour of the resilience kernel, driven through the
//! in-memory harness with a scripted sync target.

use kuanza_devkit::{test_config, Script, TestHarness};
use kuanza_kernel::buffer::BufferType;
use kuanza_kernel::error::ResilienceError;
use kuanza_kernel::resilience::ResilienceConfigPatch;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn queue_drains_by_priority_then_insertion() {
    let h = TestHarness::new();
    let q = &h.app.buffer;
    let a = q.enqueue("dev-1", BufferType::Normal, json!({"n": "a"}), None).unwrap();
    let b = q.enqueue("dev-1", BufferType::Critical, json!({"n": "b"}), None).unwrap();
    let c = q.enqueue("dev-1", BufferType::Normal, json!({"n": "c"}), None).unwrap();
    let d = q.enqueue("dev-1", BufferType::LowPriority, json!({"n": "d"}), None).unwrap();
    let e = q.enqueue("dev-1", BufferType::Critical, json!({"n": "e"}), None).unwrap();

    assert_eq!(b.queue_position, 1);
    assert_eq!(c.queue_position, 3);
    assert_eq!(e.queue_position, 2);

    let order: Vec<String> = q.pending("dev-1").unwrap().into_iter().map(|i| i.id).collect();
    let expected = vec![b.item.id, e.item.id, a.item.id, c.item.id, d.item.id];
    assert_eq!(order, expected);

    h.app.sync.process_sync("dev-1", true).await.unwrap();
    assert_eq!(h.target.pushed_ids(), expected);
}

#[tokio::test]
async fn explicit_priority_overrides_type_default() {
    let h = TestHarness::new();
    let q = &h.app.buffer;
    q.enqueue("dev-1", BufferType::Critical, json!({}), None).unwrap();
    let urgent = q.enqueue("dev-1", BufferType::LowPriority, json!({}), Some(50)).unwrap();
    assert_eq!(urgent.queue_position, 1);
    assert_eq!(urgent.item.sync_priority, 50);
}

#[tokio::test]
async fn always_failing_item_is_attempted_six_times_then_dropped() {
    let mut cfg = test_config();
    cfg.sync.dead_letter = true;
    let h = TestHarness::with_config(cfg);
    h.target.set_script(Script::RejectAll);
    h.app.buffer.enqueue("dev-1", BufferType::Critical, json!({"order": 9}), None).unwrap();

    for pass in 1..=5u32 {
        let report = h.app.sync.process_sync("dev-1", true).await.unwrap();
        assert_eq!((report.failed, report.abandoned), (1, 0), "pass {pass}");
        let pending = h.app.buffer.pending("dev-1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, pass);
        assert!(pending[0].retry_count <= pending[0].max_retries);
    }

    let last = h.app.sync.process_sync("dev-1", true).await.unwrap();
    assert_eq!((last.failed, last.abandoned), (1, 1));
    assert!(h.app.buffer.pending("dev-1").unwrap().is_empty());
    assert_eq!(h.target.pushes().len(), 6);

    let dead = h.app.sync.abandoned("dev-1").unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].item.retry_count, dead[0].item.max_retries);

    let after = h.app.sync.process_sync("dev-1", true).await.unwrap();
    assert_eq!(after.items_processed, 0);
    assert_eq!(h.target.pushes().len(), 6);
}

#[tokio::test]
async fn retry_budget_follows_device_config() {
    let h = TestHarness::new();
    let patch = ResilienceConfigPatch { auto_retry_max_attempts: Some(1), ..Default::default() };
    h.app.resilience.update("dev-2", &patch).unwrap();
    h.target.set_script(Script::RejectAll);
    let item = h.app.buffer.enqueue("dev-2", BufferType::Normal, json!({}), None).unwrap();
    assert_eq!(item.item.max_retries, 1);

    h.app.sync.process_sync("dev-2", true).await.unwrap();
    let second = h.app.sync.process_sync("dev-2", true).await.unwrap();
    assert_eq!(second.abandoned, 1);
    assert!(h.app.sync.abandoned("dev-2").unwrap().is_empty(), "dead letters are opt-in");
}

#[tokio::test]
async fn offline_device_needs_force() {
    let h = TestHarness::new();
    h.app.buffer.enqueue("dev-1", BufferType::Normal, json!({}), None).unwrap();

    let err = h.app.sync.process_sync("dev-1", false).await.unwrap_err();
    assert!(matches!(err, ResilienceError::NetworkUnavailable { .. }));
    assert!(h.target.pushes().is_empty());
    assert_eq!(h.app.buffer.pending("dev-1").unwrap().len(), 1);
    assert!(h.app.buffer.tracker("dev-1").unwrap().last_attempt.is_none());

    let forced = h.app.sync.process_sync("dev-1", true).await.unwrap();
    assert_eq!(forced.successful, 1);

    h.app.buffer.enqueue("dev-1", BufferType::Normal, json!({}), None).unwrap();
    h.set_online("dev-1").unwrap();
    let online = h.app.sync.process_sync("dev-1", false).await.unwrap();
    assert_eq!(online.successful, 1);
}

#[tokio::test]
async fn network_failure_threshold_decides_fallback() {
    let h = TestHarness::new();
    let long = h.app.failures.record_network_failure("dev-1", 45_000, vec!["sync".into()]).unwrap();
    assert!(long.fallback_used);
    let recovery = long.recovery_time.unwrap();
    assert_eq!((recovery - long.timestamp).whole_milliseconds(), 15_000);

    let short = h.app.failures.record_network_failure("dev-1", 10_000, Vec::new()).unwrap();
    assert!(!short.fallback_used);
    assert!(short.recovery_time.is_none());

    assert_eq!(h.app.failures.network_failures("dev-1").unwrap().len(), 2);
}

#[tokio::test]
async fn critical_battery_triggers_shutdown() {
    let h = TestHarness::new();
    let low = h.app.failures.record_power_failure("dev-1", 10, vec!["pod".into()]).unwrap();
    assert!(low.auto_shutdown_triggered);
    assert_eq!(low.critical_operations_protected, vec!["pod".to_string()]);

    let fine = h.app.failures.record_power_failure("dev-1", 50, Vec::new()).unwrap();
    assert!(!fine.auto_shutdown_triggered);
}

#[tokio::test]
async fn stats_count_by_type_and_clear_after_drain() {
    let h = TestHarness::new();
    let q = &h.app.buffer;
    for _ in 0..2 {
        q.enqueue("dev-1", BufferType::Critical, json!({}), None).unwrap();
    }
    for _ in 0..3 {
        q.enqueue("dev-1", BufferType::Normal, json!({}), None).unwrap();
    }
    q.enqueue("dev-1", BufferType::LowPriority, json!({}), None).unwrap();

    let stats = q.stats("dev-1").unwrap();
    assert_eq!(stats.total_pending, 6);
    assert_eq!((stats.critical_items, stats.normal_items, stats.low_priority_items), (2, 3, 1));
    assert_eq!(stats.success_rate, 100.0);
    assert!(stats.last_successful_sync.is_none());

    let report = h.app.sync.process_sync("dev-1", true).await.unwrap();
    assert_eq!(report.successful, 6);
    let after = q.stats("dev-1").unwrap();
    assert_eq!(after.total_pending, 0);
    assert_eq!(after.average_wait_time, 0.0);
    assert_eq!(after.success_rate, 100.0);
    assert!(after.last_successful_sync.is_some());
}

#[tokio::test]
async fn unseen_device_status_is_stable() {
    let h = TestHarness::new();
    let first = h.app.network.get_status("ghost").unwrap();
    assert!(!first.is_online);
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = h.app.network.get_status("ghost").unwrap();
    assert_eq!(first, second);
    assert!(h.app.network.peek("ghost").unwrap().is_some());
}

#[tokio::test]
async fn items_buffered_during_a_drain_wait_for_the_next_pass() {
    let mut cfg = test_config();
    cfg.sync.item_timeout_ms = 5_000;
    let h = TestHarness::with_config(cfg);
    h.target.set_script(Script::Hold);

    let first = h.app.buffer.enqueue("dev-1", BufferType::Normal, json!({"n": 1}), None).unwrap();

    let sync = h.app.sync.clone();
    let pass = tokio::spawn(async move { sync.process_sync("dev-1", true).await });

    h.target.wait_entered().await;
    let late = h.app.buffer.enqueue("dev-1", BufferType::Critical, json!({"n": 2}), None).unwrap();
    h.target.release();

    let report = pass.await.unwrap().unwrap();
    assert_eq!(report.items_processed, 1);
    assert_eq!(h.target.pushed_ids(), vec![first.item.id]);

    let pending = h.app.buffer.pending("dev-1").unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, late.item.id);
    assert_eq!(pending[0].retry_count, 0);
    assert_eq!(report.sync_stats.total_pending, 1);
}

#[tokio::test]
async fn concurrent_drains_of_one_device_do_not_double_push() {
    let h = TestHarness::new();
    h.target.set_script(Script::Stall(Duration::from_millis(20)));
    for _ in 0..4 {
        h.app.buffer.enqueue("dev-1", BufferType::Normal, json!({}), None).unwrap();
    }

    let (a, b) = tokio::join!(
        h.app.sync.process_sync("dev-1", true),
        h.app.sync.process_sync("dev-1", true)
    );
    let total = a.unwrap().successful + b.unwrap().successful;
    assert_eq!(total, 4);
    assert_eq!(h.target.pushes().len(), 4);
}

#[tokio::test]
async fn sms_credit_is_refunded_when_the_carrier_fails() {
    let h = TestHarness::new();
    let provider = kuanza_kernel::network::Provider::Unitel;
    h.app.fallback.configure_sms("dev-1", "+244923111222", provider).unwrap();

    h.gateway.set_failing(true);
    let fallback = &h.app.fallback;
    let failed =
        fallback.send_sms_pod("dev-1", "TRK-9", "delivered", "+244923000000").await.unwrap();
    assert!(!failed.success);
    assert_eq!(h.app.resilience.get("dev-1").unwrap().sms_credits, 100);

    h.gateway.set_failing(false);
    let sent = fallback.send_sms_pod("dev-1", "TRK-9", "delivered", "+244923000000").await.unwrap();
    assert!(sent.success);
    assert_eq!(sent.remaining_credits, 99);
    assert_eq!(h.gateway.sent()[0].text, "POD TRK-9: delivered");
    assert_eq!(h.app.resilience.defaults().sms_credits, 100);
}

#[tokio::test]
async fn json_stores_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let h = TestHarness::on_disk(test_config(), dir.path()).unwrap();
        h.app.buffer.enqueue("dev-1", BufferType::Critical, json!({"keep": true}), None).unwrap();
        h.app.failures.record_power_failure("dev-1", 5, Vec::new()).unwrap();
    }
    let h = TestHarness::on_disk(test_config(), dir.path()).unwrap();
    let pending = h.app.buffer.pending("dev-1").unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload, json!({"keep": true}));
    assert_eq!(h.app.failures.power_failures("dev-1").unwrap().len(), 1);
}

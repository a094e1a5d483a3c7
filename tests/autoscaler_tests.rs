//! Autoscaling monitor behavior against the in-memory stream service:
//! vote combination driving real scaling actions, cooldown honoring,
//! notification side-effects, and reconciliation of external resizes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use streamshard::auto::{StreamMonitor, StreamPolicy};
use streamshard::control::memory::InMemoryStreamService;
use streamshard::control::traits::MetricDatapoint;
use streamshard::prelude::*;

fn policy_json(stream: &str, body: &str) -> StreamPolicy {
    let json = format!(r#"{{ "streamName": "{}", {} }}"#, stream, body);
    let policy: StreamPolicy = serde_json::from_str(&json).unwrap();
    policy.validate().unwrap();
    policy
}

/// Stage `count` one-minute samples for `metric` sitting at `pct` of the
/// given per-second capacity, ending now.
fn stage_samples(svc: &InMemoryStreamService, metric: &str, pct: f64, capacity: f64, count: u32) {
    let now = Utc::now();
    let points: Vec<MetricDatapoint> = (0..count)
        .map(|i| MetricDatapoint {
            timestamp: now - chrono::Duration::minutes(i as i64),
            sum: pct * capacity * 60.0,
            unit: if metric.ends_with("Bytes") {
                "BYTES".to_string()
            } else {
                "COUNT".to_string()
            },
        })
        .collect();
    svc.push_datapoints(metric, points);
}

// ============================================================================
// Vote matrix driving actions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_get_down_vote_wins_over_put_none_and_notifies() {
    // PUT sits mid-band (NONE), GET is sustained-low (DOWN): the combined
    // decision is DOWN and the scale-down notification target hears about
    // it with a "Scale Down" subject.
    let svc = Arc::new(InMemoryStreamService::new());
    svc.create_stream("orders", 4);

    let policy = policy_json(
        "orders",
        r#""scaleOnOperations": ["PUT", "GET"],
           "scaleUp":   { "thresholdPct": 75, "afterMins": 3, "scalePct": 200 },
           "scaleDown": { "thresholdPct": 25, "afterMins": 3, "scaleCount": 2,
                          "notificationTarget": "arn:sink:scaling" }"#,
    );

    let put_bytes_cap = 4.0 * 1_048_576.0;
    let get_bytes_cap = 4.0 * 2_097_152.0;
    // PUT at 50% of capacity: neither high nor low, and governing for PUT
    // because its records dimension is empty (0%).
    stage_samples(&svc, "PutRecord.Bytes", 0.5, put_bytes_cap, 3);
    // GET at 5%: low for the whole window.
    stage_samples(&svc, "GetRecords.Bytes", 0.05, get_bytes_cap, 3);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut monitor = StreamMonitor::new(policy, svc.clone(), svc.clone(), Some(svc.clone() as Arc<dyn Notifier>))
        .with_report_channel(tx);

    monitor.refresh_capacity().await.unwrap();
    monitor.run_cycle().await.unwrap();

    let report = rx.try_recv().expect("a scaling report is emitted");
    assert_eq!(report.end_status, CompletionStatus::Ok);
    assert_eq!(report.direction, ScaleDirection::Down);
    assert_eq!(svc.open_shards("orders").len(), 2);

    let notifications = svc.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].target, "arn:sink:scaling");
    assert!(notifications[0].subject.ends_with("Scale Down"));
    assert!(notifications[0].body.contains("orders"));
}

#[tokio::test(start_paused = true)]
async fn test_any_up_vote_wins() {
    // GET votes DOWN but PUT is saturated: the matrix resolves UP.
    let svc = Arc::new(InMemoryStreamService::new());
    svc.create_stream("orders", 2);

    let policy = policy_json(
        "orders",
        r#""scaleOnOperations": ["PUT", "GET"],
           "scaleUp":   { "thresholdPct": 75, "afterMins": 3, "scalePct": 200,
                          "notificationTarget": "arn:sink:scaling" },
           "scaleDown": { "thresholdPct": 25, "afterMins": 3, "scaleCount": 1 }"#,
    );

    let put_bytes_cap = 2.0 * 1_048_576.0;
    stage_samples(&svc, "PutRecord.Bytes", 0.95, put_bytes_cap, 3);
    // GET stays silent: every sample in its window is a padded low.

    let mut monitor = StreamMonitor::new(policy, svc.clone(), svc.clone(), Some(svc.clone() as Arc<dyn Notifier>));
    monitor.refresh_capacity().await.unwrap();
    monitor.run_cycle().await.unwrap();

    assert_eq!(svc.open_shards("orders").len(), 4);
    let notifications = svc.notifications();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].subject.ends_with("Scale Up"));
}

#[tokio::test(start_paused = true)]
async fn test_mid_band_utilisation_takes_no_action() {
    let svc = Arc::new(InMemoryStreamService::new());
    svc.create_stream("orders", 2);

    let policy = policy_json(
        "orders",
        r#""scaleOnOperations": ["PUT"],
           "scaleUp":   { "thresholdPct": 75, "afterMins": 3, "scalePct": 200 },
           "scaleDown": { "thresholdPct": 25, "afterMins": 3, "scaleCount": 1 }"#,
    );

    let put_bytes_cap = 2.0 * 1_048_576.0;
    stage_samples(&svc, "PutRecord.Bytes", 0.5, put_bytes_cap, 3);

    let mut monitor = StreamMonitor::new(policy, svc.clone(), svc.clone(), None);
    monitor.refresh_capacity().await.unwrap();
    monitor.run_cycle().await.unwrap();

    assert_eq!(svc.open_shards("orders").len(), 2);
    let (splits, merges, updates) = svc.mutation_counts("orders");
    assert_eq!((splits, merges, updates), (0, 0, 0));
}

// ============================================================================
// Cooldowns
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_scale_down_cooldown_defers_second_action() {
    let svc = Arc::new(InMemoryStreamService::new());
    svc.create_stream("orders", 8);

    let policy = policy_json(
        "orders",
        r#""scaleOnOperations": ["GET"],
           "scaleUp":   { "thresholdPct": 75, "afterMins": 3, "scalePct": 200 },
           "scaleDown": { "thresholdPct": 25, "afterMins": 3, "scaleCount": 2,
                          "coolOffMins": 60 }"#,
    );

    // An idle stream: padded lows vote DOWN every cycle.
    let mut monitor = StreamMonitor::new(policy, svc.clone(), svc.clone(), None);
    monitor.refresh_capacity().await.unwrap();

    monitor.run_cycle().await.unwrap();
    assert_eq!(svc.open_shards("orders").len(), 6);

    // Immediately after, the decision is still DOWN but the cooldown
    // holds the action back.
    monitor.run_cycle().await.unwrap();
    assert_eq!(svc.open_shards("orders").len(), 6);

    // Once the cool-off elapses the next DOWN goes through.
    tokio::time::advance(Duration::from_secs(61 * 60)).await;
    monitor.run_cycle().await.unwrap();
    assert_eq!(svc.open_shards("orders").len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_capped_action_does_not_start_cooldown() {
    // The stream starts at its configured minimum, so the first DOWN
    // decision resolves to AlreadyAtMinimum. That outcome must not arm
    // the cooldown clock: after an external grow, the very next DOWN
    // decision acts immediately.
    let svc = Arc::new(InMemoryStreamService::new());
    svc.create_stream("orders", 2);

    let policy = policy_json(
        "orders",
        r#""scaleOnOperations": ["GET"],
           "minShards": 2,
           "scaleUp":   { "thresholdPct": 75, "afterMins": 3, "scalePct": 200 },
           "scaleDown": { "thresholdPct": 25, "afterMins": 3, "scaleCount": 4,
                          "coolOffMins": 60 }"#,
    );

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut monitor = StreamMonitor::new(policy, svc.clone(), svc.clone(), None)
        .with_report_channel(tx);
    monitor.refresh_capacity().await.unwrap();

    monitor.run_cycle().await.unwrap();
    let report = rx.try_recv().expect("capped attempt still reports");
    assert_eq!(report.end_status, CompletionStatus::AlreadyAtMinimum);
    assert_eq!(svc.open_shards("orders").len(), 2);

    svc.resize_externally("orders", 8);
    monitor.refresh_capacity().await.unwrap();

    // No time has passed; only the absence of a cooldown lets this act.
    monitor.run_cycle().await.unwrap();
    assert_eq!(svc.open_shards("orders").len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_already_one_shard_reports_minimum_without_cooldown() {
    let svc = Arc::new(InMemoryStreamService::new());
    svc.create_stream("orders", 1);

    let policy = policy_json(
        "orders",
        r#""scaleOnOperations": ["GET"],
           "scaleUp":   { "thresholdPct": 75, "afterMins": 3, "scalePct": 200 },
           "scaleDown": { "thresholdPct": 25, "afterMins": 3, "scaleCount": 1 }"#,
    );

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut monitor = StreamMonitor::new(policy, svc.clone(), svc.clone(), None)
        .with_report_channel(tx);
    monitor.refresh_capacity().await.unwrap();
    monitor.run_cycle().await.unwrap();

    let report = rx.try_recv().expect("a report is emitted");
    assert_eq!(report.end_status, CompletionStatus::AlreadyAtMinimum);
    assert_eq!(report.operations_made, 0);

    let (splits, merges, updates) = svc.mutation_counts("orders");
    assert_eq!((splits, merges, updates), (0, 0, 0));
}

// ============================================================================
// Capacity reconciliation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_external_resize_reconciled_after_refresh_window() {
    // An external actor doubles the stream between cycles. Once the
    // refresh window elapses the cached capacity absorbs the new shard
    // count and subsequent utilisation math divides by the new capacity.
    let svc = Arc::new(InMemoryStreamService::new());
    svc.create_stream("orders", 2);

    let policy = policy_json(
        "orders",
        r#""scaleOnOperations": ["PUT"],
           "refreshShardsAfterMins": 10,
           "scaleUp": { "thresholdPct": 75, "afterMins": 3, "scalePct": 200 }"#,
    );

    let mut monitor = StreamMonitor::new(policy, svc.clone(), svc.clone(), None);
    monitor.refresh_capacity().await.unwrap();
    assert_eq!(
        monitor
            .metrics_manager()
            .max_capacity(OperationType::Put)
            .unwrap()
            .bytes_per_sec,
        2 * 1_048_576
    );

    svc.resize_externally("orders", 4);

    // Within the refresh window the cache is intentionally stale.
    monitor.run_cycle().await.unwrap();
    assert_eq!(
        monitor
            .metrics_manager()
            .max_capacity(OperationType::Put)
            .unwrap()
            .bytes_per_sec,
        2 * 1_048_576
    );

    // Past the boundary the next cycle reloads it.
    tokio::time::advance(Duration::from_secs(11 * 60)).await;
    monitor.run_cycle().await.unwrap();
    assert_eq!(
        monitor
            .metrics_manager()
            .max_capacity(OperationType::Put)
            .unwrap()
            .bytes_per_sec,
        4 * 1_048_576
    );
}

// ============================================================================
// Monitor lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_monitor_stops_on_signal() {
    let svc = Arc::new(InMemoryStreamService::new());
    svc.create_stream("orders", 2);

    let policy = policy_json(
        "orders",
        r#""scaleOnOperations": ["PUT"],
           "checkIntervalSec": 45,
           "scaleUp": { "thresholdPct": 75, "afterMins": 3, "scalePct": 200 }"#,
    );

    let monitor = StreamMonitor::new(policy, svc.clone(), svc.clone(), None);
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(monitor.run(stop_rx));

    tokio::time::sleep(Duration::from_secs(100)).await;
    stop_tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(60), task)
        .await
        .expect("monitor exits after stop signal")
        .expect("monitor task does not panic");
    assert!(result.is_ok());
}

//! Retry discipline of the control-plane shim: in-flight mutations wait a
//! fixed delay, throttles back off exponentially, and argument errors
//! surface without a second attempt.

use std::sync::Arc;
use std::time::Duration;

use streamshard::control::memory::InMemoryStreamService;
use streamshard::hash::MAX_HASH;
use streamshard::prelude::*;

fn control_for(shards: usize) -> (ShardControl, Arc<InMemoryStreamService>) {
    let service = Arc::new(InMemoryStreamService::new());
    service.create_stream("orders", shards);
    (ShardControl::new(service.clone()), service)
}

#[tokio::test(start_paused = true)]
async fn test_split_retries_through_resource_in_use() {
    let (control, svc) = control_for(1);
    svc.inject_error("split", ScalingError::ResourceInUse("mutating".into()));
    svc.inject_error("split", ScalingError::ResourceInUse("still mutating".into()));

    let start = tokio::time::Instant::now();
    control
        .split_shard("orders", "shardId-000000000000", MAX_HASH / 2 + 1, false)
        .await
        .unwrap();

    // Two fixed one-second waits before the attempt that lands.
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(svc.open_shards("orders").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_merge_retries_through_throttling() {
    let (control, svc) = control_for(2);
    svc.inject_error("merge", ScalingError::Throttled("limit exceeded".into()));

    let open = svc.open_shards("orders");
    let ids: Vec<String> = open.iter().map(|s| s.shard_id().to_string()).collect();

    control
        .merge_shards("orders", &ids[0], &ids[1], false)
        .await
        .unwrap();
    assert_eq!(svc.open_shards("orders").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_argument_is_not_retried() {
    let (control, svc) = control_for(1);

    // A split outside the shard's range is rejected by the service; the
    // shim must not burn retries on it.
    let err = control
        .split_shard("orders", "shardId-000000000000", 0, false)
        .await;
    assert!(matches!(err, Err(ScalingError::InvalidArgument(_))));
    assert_eq!(svc.open_shards("orders").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_listing_retries_through_transient_failures() {
    let (control, svc) = control_for(6);
    svc.set_page_size(2);
    svc.inject_error("list", ScalingError::Backend("socket reset".into()));

    let shards = control.list_all_shards("orders", None).await.unwrap();
    assert_eq!(shards.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_in_use_exhausts_retry_budget() {
    let (control, svc) = control_for(1);
    for _ in 0..12 {
        svc.inject_error("split", ScalingError::ResourceInUse("wedged".into()));
    }

    let err = control
        .split_shard("orders", "shardId-000000000000", MAX_HASH / 2 + 1, false)
        .await;
    assert!(matches!(err, Err(ScalingError::RetriesExhausted { .. })));
    assert_eq!(svc.open_shards("orders").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_status_polls_until_active() {
    let (control, svc) = control_for(1);

    // Issue a mutation without waiting, then wait explicitly.
    control
        .split_shard("orders", "shardId-000000000000", MAX_HASH / 2 + 1, false)
        .await
        .unwrap();
    assert_eq!(
        control.stream_status("orders").await.unwrap(),
        StreamStatus::Updating
    );

    control
        .wait_for_status("orders", StreamStatus::Active)
        .await
        .unwrap();
    assert_eq!(
        control.stream_status("orders").await.unwrap(),
        StreamStatus::Active
    );
}

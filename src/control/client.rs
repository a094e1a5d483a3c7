//! Retrying shim over the stream control plane.
//!
//! [`ShardControl`] wraps a [`StreamControlPlane`] with the crate's retry
//! policy, full-listing pagination, open-shard derivation, and the
//! wait-until-active discipline that keeps at most one mutation in flight
//! per stream.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::constants::{WAIT_FOR_ACTIVE_INITIAL_SECS, WAIT_FOR_ACTIVE_POLL_SECS};
use crate::control::traits::{StreamControlPlane, StreamStatus};
use crate::error::{Result, ScalingError};
use crate::metrics;
use crate::retry::run_stream_op;
use crate::shard::{OpenShardSet, Shard, ShardInfo};

/// Client-side view of one stream's control plane, with retries applied to
/// every call and blocking waits for mutation settlement.
#[derive(Clone)]
pub struct ShardControl {
    plane: Arc<dyn StreamControlPlane>,
}

impl ShardControl {
    pub fn new(plane: Arc<dyn StreamControlPlane>) -> ShardControl {
        ShardControl { plane }
    }

    /// Current status of the stream.
    pub async fn stream_status(&self, stream: &str) -> Result<StreamStatus> {
        let plane = &self.plane;
        run_stream_op("describe_stream", || async move {
            plane.describe_stream(stream).await.map(|d| d.status)
        })
        .await
    }

    /// Poll until the stream reaches `status`. Mutations take tens of
    /// seconds to settle, so the first poll is deferred before dropping to
    /// a tight interval.
    pub async fn wait_for_status(&self, stream: &str, status: StreamStatus) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(WAIT_FOR_ACTIVE_INITIAL_SECS)).await;

        loop {
            if self.stream_status(stream).await? == status {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(WAIT_FOR_ACTIVE_POLL_SECS)).await;
        }
    }

    /// List every shard of the stream, optionally bounded to shards created
    /// after `exclusive_start_shard_id`. Pagination follows `next_token`
    /// and terminates strictly when it is absent.
    pub async fn list_all_shards(
        &self,
        stream: &str,
        exclusive_start_shard_id: Option<&str>,
    ) -> Result<Vec<Shard>> {
        let mut all = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let plane = &self.plane;
            let token_ref = token.as_deref();
            let page = run_stream_op("list_shards", || async move {
                plane
                    .list_shards(stream, exclusive_start_shard_id, token_ref)
                    .await
            })
            .await?;

            all.extend(page.shards);

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        debug!(stream, shards = all.len(), "Listed stream shards");
        Ok(all)
    }

    /// The stream's open shards, ascending by start hash.
    pub async fn get_open_shards(&self, stream: &str) -> Result<OpenShardSet> {
        let listing = self.list_all_shards(stream, None).await?;
        let open = OpenShardSet::from_listing(&listing)?;
        metrics::OPEN_SHARDS
            .with_label_values(&[stream])
            .set(open.len() as i64);
        Ok(open)
    }

    /// Open shards created after `after_shard_id`, plus any still-open
    /// older shards in that range. Used after a mutation to find the
    /// children without re-reading the whole catalog.
    pub async fn get_open_shards_after(
        &self,
        stream: &str,
        after_shard_id: &str,
    ) -> Result<OpenShardSet> {
        let listing = self.list_all_shards(stream, Some(after_shard_id)).await?;
        OpenShardSet::from_listing(&listing)
    }

    /// Number of open shards.
    pub async fn get_open_shard_count(&self, stream: &str) -> Result<usize> {
        Ok(self.get_open_shards(stream).await?.len())
    }

    /// A single open shard by id.
    pub async fn get_open_shard(&self, stream: &str, shard_id: &str) -> Result<ShardInfo> {
        self.get_open_shards(stream)
            .await?
            .get(shard_id)
            .cloned()
            .ok_or_else(|| {
                ScalingError::NotFound(format!(
                    "shard {} is not open on stream {}",
                    shard_id, stream
                ))
            })
    }

    /// Split `shard_id` at `target_hash`, optionally blocking until the
    /// stream returns to `ACTIVE`.
    pub async fn split_shard(
        &self,
        stream: &str,
        shard_id: &str,
        target_hash: u128,
        wait_for_active: bool,
    ) -> Result<()> {
        let plane = &self.plane;
        run_stream_op("split_shard", || async move {
            plane.split_shard(stream, shard_id, target_hash).await
        })
        .await?;

        metrics::SHARD_MUTATIONS
            .with_label_values(&[stream, "split"])
            .inc();

        if wait_for_active {
            self.wait_for_status(stream, StreamStatus::Active).await?;
        }
        Ok(())
    }

    /// Merge the adjacent shards `lower_id` and `higher_id`.
    pub async fn merge_shards(
        &self,
        stream: &str,
        lower_id: &str,
        higher_id: &str,
        wait_for_active: bool,
    ) -> Result<()> {
        let plane = &self.plane;
        run_stream_op("merge_shards", || async move {
            plane.merge_shards(stream, lower_id, higher_id).await
        })
        .await?;

        metrics::SHARD_MUTATIONS
            .with_label_values(&[stream, "merge"])
            .inc();

        if wait_for_active {
            self.wait_for_status(stream, StreamStatus::Active).await?;
        }
        Ok(())
    }

    /// Atomically resize the stream to `target` shards, blocking until it
    /// settles. Targets the service cannot honor surface as
    /// [`ScalingError::InvalidArgument`] or [`ScalingError::Throttled`],
    /// which callers treat as the signal to fall back to split/merge.
    pub async fn update_shard_count(&self, stream: &str, target: u32) -> Result<()> {
        let plane = &self.plane;
        // One attempt: the fallback path owns failure handling, and
        // retrying a rejected resize would only re-earn the same answer.
        plane.update_shard_count(stream, target).await?;

        metrics::SHARD_MUTATIONS
            .with_label_values(&[stream, "update_shard_count"])
            .inc();
        info!(stream, target, "Requested atomic shard count update");

        self.wait_for_status(stream, StreamStatus::Active).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::memory::InMemoryStreamService;
    use crate::hash::MAX_HASH;

    fn control_with_stream(shards: usize) -> (ShardControl, Arc<InMemoryStreamService>) {
        let service = Arc::new(InMemoryStreamService::new());
        service.create_stream("orders", shards);
        (ShardControl::new(service.clone()), service)
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_shard_count_matches_creation() {
        let (control, _svc) = control_with_stream(4);
        assert_eq!(control.get_open_shard_count("orders").await.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pagination_terminates_on_missing_token() {
        let (control, svc) = control_with_stream(10);
        svc.set_page_size(3);

        let shards = control.list_all_shards("orders", None).await.unwrap();
        assert_eq!(shards.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_open_shard_missing_is_not_found() {
        let (control, _svc) = control_with_stream(1);
        let err = control.get_open_shard("orders", "shardId-nope").await;
        assert!(matches!(err, Err(ScalingError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_waits_for_active_and_creates_children() {
        let (control, _svc) = control_with_stream(1);
        let open = control.get_open_shards("orders").await.unwrap();
        let only = open.iter().next().unwrap().clone();

        control
            .split_shard("orders", only.shard_id(), MAX_HASH / 2 + 1, true)
            .await
            .unwrap();

        let after = control.get_open_shards("orders").await.unwrap();
        assert_eq!(after.len(), 2);
        assert!(after.covers_keyspace());
        assert_eq!(
            control.stream_status("orders").await.unwrap(),
            StreamStatus::Active
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_waits_for_active_and_joins_ranges() {
        let (control, _svc) = control_with_stream(2);
        let open = control.get_open_shards("orders").await.unwrap();
        let ids: Vec<String> = open.iter().map(|s| s.shard_id().to_string()).collect();

        control
            .merge_shards("orders", &ids[0], &ids[1], true)
            .await
            .unwrap();

        let after = control.get_open_shards("orders").await.unwrap();
        assert_eq!(after.len(), 1);
        assert!(after.covers_keyspace());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_after_bound_excludes_older_shards() {
        let (control, _svc) = control_with_stream(1);
        let open = control.get_open_shards("orders").await.unwrap();
        let first = open.iter().next().unwrap().clone();

        control
            .split_shard("orders", first.shard_id(), MAX_HASH / 2 + 1, true)
            .await
            .unwrap();

        let after = control
            .get_open_shards_after("orders", first.shard_id())
            .await
            .unwrap();
        // Only the two children are past the bound.
        assert_eq!(after.len(), 2);
    }
}

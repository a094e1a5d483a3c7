//! In-memory stream service.
//!
//! [`InMemoryStreamService`] implements all three capability traits against
//! process-local state, enforcing the same rules the real service does:
//! only one mutation in flight per stream, splits bounded to the parent's
//! hash range, merges only between adjacent open shards, and shard-count
//! updates only within the service's resize envelope.
//!
//! The crate's own tests run against it, and it doubles as a scripting
//! harness: utilisation datapoints can be staged per metric name, errors
//! can be injected per operation, and every published notification is
//! retained for inspection.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::control::traits::{
    MetricDatapoint, MetricQuery, MetricsBackend, Notifier, ShardListing, StreamControlPlane,
    StreamDescription, StreamStatus,
};
use crate::error::{Result, ScalingError};
use crate::hash::MAX_HASH;
use crate::shard::{OpenShardSet, Shard};

/// A notification captured by the in-memory [`Notifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedNotification {
    pub target: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug)]
struct StreamState {
    shards: Vec<Shard>,
    status: StreamStatus,
    /// Describe calls remaining before an `Updating` stream settles.
    settle_after: u32,
    next_shard_seq: u64,
    splits: u32,
    merges: u32,
    updates: u32,
}

impl StreamState {
    fn allocate_shard_id(&mut self) -> String {
        let id = format!("shardId-{:012}", self.next_shard_seq);
        self.next_shard_seq += 1;
        id
    }

    fn begin_mutation(&mut self, stream: &str) -> Result<()> {
        if self.status != StreamStatus::Active {
            return Err(ScalingError::ResourceInUse(format!(
                "stream {} has a mutation in flight",
                stream
            )));
        }
        self.status = StreamStatus::Updating;
        self.settle_after = 1;
        Ok(())
    }

    fn open_set(&self) -> Result<OpenShardSet> {
        OpenShardSet::from_listing(&self.shards)
    }
}

#[derive(Default)]
struct ServiceState {
    streams: HashMap<String, StreamState>,
    page_size: usize,
    injected: HashMap<&'static str, VecDeque<ScalingError>>,
    datapoints: HashMap<String, Vec<MetricDatapoint>>,
    notifications: Vec<PublishedNotification>,
    /// When set, `update_shard_count` always fails with this error.
    update_shard_count_rejection: Option<fn(String) -> ScalingError>,
}

/// In-memory implementation of the stream control plane, metrics backend,
/// and notification sink.
pub struct InMemoryStreamService {
    state: Mutex<ServiceState>,
}

impl Default for InMemoryStreamService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStreamService {
    pub fn new() -> InMemoryStreamService {
        InMemoryStreamService {
            state: Mutex::new(ServiceState {
                page_size: usize::MAX,
                ..ServiceState::default()
            }),
        }
    }

    /// Create a stream with `shard_count` equal-width open shards.
    pub fn create_stream(&self, name: &str, shard_count: usize) {
        assert!(shard_count > 0, "streams have at least one shard");
        let mut state = self.state.lock().unwrap();

        let mut stream = StreamState {
            shards: Vec::new(),
            status: StreamStatus::Active,
            settle_after: 0,
            next_shard_seq: 0,
            splits: 0,
            merges: 0,
            updates: 0,
        };

        let chunk = MAX_HASH / shard_count as u128;
        for i in 0..shard_count as u128 {
            let start = i * chunk;
            let end = if i == shard_count as u128 - 1 {
                MAX_HASH
            } else {
                (i + 1) * chunk - 1
            };
            let id = stream.allocate_shard_id();
            stream.shards.push(Shard {
                shard_id: id,
                start_hash: start,
                end_hash: end,
                parent_shard_id: None,
                adjacent_parent_shard_id: None,
            });
        }

        state.streams.insert(name.to_string(), stream);
    }

    /// Limit listing pages to `size` shards, to exercise pagination.
    pub fn set_page_size(&self, size: usize) {
        self.state.lock().unwrap().page_size = size.max(1);
    }

    /// Queue an error to be returned by the next call(s) to `operation`
    /// (`"describe"`, `"list"`, `"split"`, `"merge"`, `"update"`).
    pub fn inject_error(&self, operation: &'static str, error: ScalingError) {
        self.state
            .lock()
            .unwrap()
            .injected
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Make every `update_shard_count` call fail with an invalid-argument
    /// error, forcing callers onto the split/merge path.
    pub fn reject_update_shard_count(&self) {
        self.state.lock().unwrap().update_shard_count_rejection =
            Some(|stream| ScalingError::InvalidArgument(format!(
                "shard count update rejected for stream {}",
                stream
            )));
    }

    /// Stage utilisation datapoints returned for `metric_name`.
    pub fn push_datapoints(&self, metric_name: &str, datapoints: Vec<MetricDatapoint>) {
        self.state
            .lock()
            .unwrap()
            .datapoints
            .entry(metric_name.to_string())
            .or_default()
            .extend(datapoints);
    }

    /// Drop all staged datapoints.
    pub fn clear_datapoints(&self) {
        self.state.lock().unwrap().datapoints.clear();
    }

    /// Notifications published so far, in order.
    pub fn notifications(&self) -> Vec<PublishedNotification> {
        self.state.lock().unwrap().notifications.clone()
    }

    /// Mutation counters for a stream: `(splits, merges, updates)`.
    pub fn mutation_counts(&self, stream: &str) -> (u32, u32, u32) {
        let state = self.state.lock().unwrap();
        let s = state.streams.get(stream).expect("stream exists");
        (s.splits, s.merges, s.updates)
    }

    /// The stream's open shards, for direct assertions.
    pub fn open_shards(&self, stream: &str) -> OpenShardSet {
        let state = self.state.lock().unwrap();
        state
            .streams
            .get(stream)
            .expect("stream exists")
            .open_set()
            .expect("listing is well formed")
    }

    /// Resize the stream out-of-band, bypassing status checks, to simulate
    /// an external actor scaling the stream between monitor cycles.
    pub fn resize_externally(&self, stream: &str, shard_count: usize) {
        {
            let mut state = self.state.lock().unwrap();
            state.streams.remove(stream);
        }
        self.create_stream(stream, shard_count);
    }

    fn take_injected(&self, operation: &'static str) -> Option<ScalingError> {
        self.state
            .lock()
            .unwrap()
            .injected
            .get_mut(operation)
            .and_then(|q| q.pop_front())
    }
}

#[async_trait]
impl StreamControlPlane for InMemoryStreamService {
    async fn describe_stream(&self, stream: &str) -> Result<StreamDescription> {
        if let Some(err) = self.take_injected("describe") {
            return Err(err);
        }
        let mut state = self.state.lock().unwrap();
        let s = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| ScalingError::NotFound(format!("stream {} does not exist", stream)))?;

        let status = s.status;
        if s.status == StreamStatus::Updating {
            if s.settle_after == 0 {
                s.status = StreamStatus::Active;
            } else {
                s.settle_after -= 1;
            }
        }

        Ok(StreamDescription {
            stream_name: stream.to_string(),
            status,
        })
    }

    async fn list_shards(
        &self,
        stream: &str,
        exclusive_start_shard_id: Option<&str>,
        next_token: Option<&str>,
    ) -> Result<ShardListing> {
        if let Some(err) = self.take_injected("list") {
            return Err(err);
        }
        let state = self.state.lock().unwrap();
        let s = state
            .streams
            .get(stream)
            .ok_or_else(|| ScalingError::NotFound(format!("stream {} does not exist", stream)))?;

        let bounded: Vec<&Shard> = s
            .shards
            .iter()
            .filter(|shard| match exclusive_start_shard_id {
                Some(bound) => shard.shard_id.as_str() > bound,
                None => true,
            })
            .collect();

        let offset: usize = match next_token {
            Some(token) => token
                .parse()
                .map_err(|_| ScalingError::InvalidArgument(format!("bad next token {}", token)))?,
            None => 0,
        };

        let page: Vec<Shard> = bounded
            .iter()
            .skip(offset)
            .take(state.page_size)
            .map(|s| (*s).clone())
            .collect();

        let consumed = offset + page.len();
        let next = (consumed < bounded.len()).then(|| consumed.to_string());

        Ok(ShardListing {
            shards: page,
            next_token: next,
        })
    }

    async fn split_shard(
        &self,
        stream: &str,
        shard_id: &str,
        new_starting_hash: u128,
    ) -> Result<()> {
        if let Some(err) = self.take_injected("split") {
            return Err(err);
        }
        let mut state = self.state.lock().unwrap();
        let s = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| ScalingError::NotFound(format!("stream {} does not exist", stream)))?;

        let open = s.open_set()?;
        let parent = open.get(shard_id).ok_or_else(|| {
            ScalingError::InvalidArgument(format!("shard {} is not open", shard_id))
        })?;

        if new_starting_hash <= parent.start_hash() || new_starting_hash > parent.end_hash() {
            return Err(ScalingError::InvalidArgument(format!(
                "split hash {} outside shard {} range",
                new_starting_hash, shard_id
            )));
        }

        s.begin_mutation(stream)?;

        let (parent_start, parent_end) = (parent.start_hash(), parent.end_hash());
        let parent_id = shard_id.to_string();

        let lower_id = s.allocate_shard_id();
        let higher_id = s.allocate_shard_id();
        s.shards.push(Shard {
            shard_id: lower_id,
            start_hash: parent_start,
            end_hash: new_starting_hash - 1,
            parent_shard_id: Some(parent_id.clone()),
            adjacent_parent_shard_id: None,
        });
        s.shards.push(Shard {
            shard_id: higher_id,
            start_hash: new_starting_hash,
            end_hash: parent_end,
            parent_shard_id: Some(parent_id),
            adjacent_parent_shard_id: None,
        });
        s.splits += 1;

        debug_assert!(s.open_set().map(|o| o.covers_keyspace()).unwrap_or(false));
        Ok(())
    }

    async fn merge_shards(&self, stream: &str, lower_id: &str, higher_id: &str) -> Result<()> {
        if let Some(err) = self.take_injected("merge") {
            return Err(err);
        }
        let mut state = self.state.lock().unwrap();
        let s = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| ScalingError::NotFound(format!("stream {} does not exist", stream)))?;

        let open = s.open_set()?;
        let lower = open.get(lower_id).ok_or_else(|| {
            ScalingError::InvalidArgument(format!("shard {} is not open", lower_id))
        })?;
        let higher = open.get(higher_id).ok_or_else(|| {
            ScalingError::InvalidArgument(format!("shard {} is not open", higher_id))
        })?;

        if lower.end_hash() == MAX_HASH || higher.start_hash() != lower.end_hash() + 1 {
            return Err(ScalingError::InvalidArgument(format!(
                "shards {} and {} are not adjacent",
                lower_id, higher_id
            )));
        }

        s.begin_mutation(stream)?;

        let (start, end) = (lower.start_hash(), higher.end_hash());
        let merged_id = s.allocate_shard_id();
        s.shards.push(Shard {
            shard_id: merged_id,
            start_hash: start,
            end_hash: end,
            parent_shard_id: Some(lower_id.to_string()),
            adjacent_parent_shard_id: Some(higher_id.to_string()),
        });
        s.merges += 1;

        debug_assert!(s.open_set().map(|o| o.covers_keyspace()).unwrap_or(false));
        Ok(())
    }

    async fn update_shard_count(&self, stream: &str, target: u32) -> Result<()> {
        if let Some(err) = self.take_injected("update") {
            return Err(err);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(rejection) = state.update_shard_count_rejection {
            return Err(rejection(stream.to_string()));
        }

        let s = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| ScalingError::NotFound(format!("stream {} does not exist", stream)))?;

        let current = s.open_set()?.len() as u32;
        // The service only honors resizes within a 2x envelope of the
        // current count; anything else must go through split/merge.
        let within_envelope =
            target > 0 && target <= current * 2 && target * 2 >= current;
        if !within_envelope {
            return Err(ScalingError::InvalidArgument(format!(
                "target {} outside the supported resize envelope for {} shards",
                target, current
            )));
        }

        s.begin_mutation(stream)?;

        let seq = s.next_shard_seq;
        let mut fresh = StreamState {
            shards: Vec::new(),
            status: StreamStatus::Updating,
            settle_after: 1,
            next_shard_seq: seq,
            splits: s.splits,
            merges: s.merges,
            updates: s.updates + 1,
        };
        let chunk = MAX_HASH / target as u128;
        for i in 0..target as u128 {
            let start = i * chunk;
            let end = if i == target as u128 - 1 {
                MAX_HASH
            } else {
                (i + 1) * chunk - 1
            };
            let id = fresh.allocate_shard_id();
            fresh.shards.push(Shard {
                shard_id: id,
                start_hash: start,
                end_hash: end,
                parent_shard_id: None,
                adjacent_parent_shard_id: None,
            });
        }

        state.streams.insert(stream.to_string(), fresh);
        Ok(())
    }
}

#[async_trait]
impl MetricsBackend for InMemoryStreamService {
    async fn get_metric_statistics(
        &self,
        query: &MetricQuery,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricDatapoint>> {
        if let Some(err) = self.take_injected("metrics") {
            return Err(err);
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .datapoints
            .get(&query.metric_name)
            .map(|points| {
                points
                    .iter()
                    .filter(|d| d.timestamp >= start && d.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl Notifier for InMemoryStreamService {
    async fn publish(&self, target: &str, subject: &str, body: &str) -> Result<()> {
        if let Some(err) = self.take_injected("publish") {
            return Err(err);
        }
        self.state
            .lock()
            .unwrap()
            .notifications
            .push(PublishedNotification {
                target: target.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }
}

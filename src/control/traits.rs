//! Capability traits for the external collaborators.
//!
//! Everything this crate needs from the outside world arrives through three
//! traits, injected at construction: the stream control plane, the metrics
//! backend, and the notification sink. Nothing is resolved through
//! process-wide lookup, so tests and embedders swap backends freely.
//!
//! # Available Implementations
//!
//! - `InMemoryStreamService` (in `super::memory`, behind the
//!   `test-utilities` feature): a self-contained in-process backend
//!   implementing all three traits, used by the crate's own tests and
//!   useful for local experiments.
//! - Cloud SDK adapters are the embedding host's concern; the traits mirror
//!   the service API shape closely enough that each adapter method is a
//!   direct call plus an error mapping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::shard::Shard;

/// Lifecycle states of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Creating,
    Deleting,
    Active,
    Updating,
}

/// Result of a describe call: status plus stream-level facts.
#[derive(Debug, Clone)]
pub struct StreamDescription {
    pub stream_name: String,
    pub status: StreamStatus,
}

/// One page of a shard listing.
#[derive(Debug, Clone)]
pub struct ShardListing {
    pub shards: Vec<Shard>,
    /// Token for the next page. Iteration terminates strictly on its
    /// absence - the service's separate "has more" flag is not consulted.
    pub next_token: Option<String>,
}

/// The stream service's control plane.
///
/// Implementations report failures using the semantic
/// [`ScalingError`](crate::error::ScalingError) kinds: `ResourceInUse` for
/// in-flight mutations, `Throttled` for rate limiting, `InvalidArgument`
/// for rejected parameters. The retry shim keys off this classification.
#[async_trait]
pub trait StreamControlPlane: Send + Sync {
    /// Describe the stream's current status.
    async fn describe_stream(&self, stream: &str) -> Result<StreamDescription>;

    /// List one page of shards. `exclusive_start_shard_id` bounds the
    /// listing to shards created after the given id; `next_token` continues
    /// a prior page.
    async fn list_shards(
        &self,
        stream: &str,
        exclusive_start_shard_id: Option<&str>,
        next_token: Option<&str>,
    ) -> Result<ShardListing>;

    /// Split a shard so its lower child ends just below `new_starting_hash`.
    async fn split_shard(&self, stream: &str, shard_id: &str, new_starting_hash: u128)
        -> Result<()>;

    /// Merge two adjacent shards, lower first.
    async fn merge_shards(&self, stream: &str, lower_id: &str, higher_id: &str) -> Result<()>;

    /// Ask the service to resize the stream to `target` shards in one
    /// atomic operation. The service rejects targets outside its supported
    /// envelope with an invalid-argument or limit-exceeded error.
    async fn update_shard_count(&self, stream: &str, target: u32) -> Result<()>;
}

/// A windowed metric statistics query, prepared once per tracked metric
/// name and executed with fresh start/end bounds each cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuery {
    pub namespace: String,
    pub metric_name: String,
    pub dimension_name: String,
    pub dimension_value: String,
    pub period_secs: u32,
}

/// A single statistics datapoint: the sum over one period.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDatapoint {
    pub timestamp: DateTime<Utc>,
    pub sum: f64,
    /// Unit string as declared by the backend (`BYTES` or `COUNT`).
    pub unit: String,
}

/// The metrics backend the monitor samples utilisation from.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Fetch SUM datapoints for `query` over `[start, end]`.
    async fn get_metric_statistics(
        &self,
        query: &MetricQuery,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricDatapoint>>;
}

/// Sink for scaling notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish `body` under `subject` to the configured `target`.
    async fn publish(&self, target: &str, subject: &str, body: &str) -> Result<()>;

    /// Whether this sink prefers structured JSON bodies over the
    /// human-readable report rendering.
    fn accepts_json(&self) -> bool {
        false
    }
}

//! # Streamshard
//! Shard-topology scaling and metrics-driven autoscaling for hash-keyspace
//! partitioned streams.
//!
//! Streamshard scales an Amazon-Kinesis-shaped stream the way you scale a
//! pool of elastic compute: by count, by percentage, or to an exact shard
//! count. It places a priority on eventual balance of the stream keyspace,
//! using a left-leaning topology, and on low impact to the stream, making
//! only one shard modification at any given time.
//!
//! # Goals
//! - Minimum-mutation rebalancing of the 128-bit hash keyspace
//! - A metrics-driven autoscaler with per-operation voting, cooldowns, and
//!   min/max caps
//! - Capability-style backends: every external collaborator is a trait the
//!   host injects, so the whole stack runs against the bundled in-memory
//!   service in tests (available to dependents via the `test-utilities`
//!   feature)
//!
//! ## Scaling a stream
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamshard::prelude::*;
//!
//! # async fn example(control_plane: Arc<dyn StreamControlPlane>) -> streamshard::error::Result<()> {
//! let scaler = StreamScaler::new(control_plane);
//!
//! // Double the stream, but never beyond 64 shards.
//! let report = scaler
//!     .scale_up("orders", ScaleBy::Pct(200.0), None, Some(64))
//!     .await?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```
//!
//! ## Running the autoscaler
//!
//! See [`auto`] for the configuration format and an embedding example. The
//! controller is a plain value owned by the host; there are no process
//! singletons and the library never exits the process.

#![forbid(unsafe_code)]

pub mod auto;
pub mod constants;
pub mod control;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod retry;
pub mod scaler;
pub mod shard;
pub mod telemetry;
pub mod types;

pub mod prelude {
    //! Main exports for scaling and monitoring streams.
    pub use crate::auto::{
        AutoscalingController, BackendProvider, ConfigLoader, StreamMonitor, StreamPolicy,
    };
    pub use crate::control::{
        MetricsBackend, Notifier, ShardControl, StreamControlPlane, StreamStatus,
    };
    pub use crate::error::{Result, ScalingError};
    pub use crate::scaler::{CompletionStatus, ScalingReport, StreamScaler};
    pub use crate::shard::{OpenShardSet, Shard, ShardInfo};
    pub use crate::types::{OperationType, ScaleBy, ScaleDirection, StreamMetric};
}

//! Stream control plane: capability traits, the retrying client shim, and
//! an in-memory backend.
//!
//! The crate never talks to the outside world directly. The traits in
//! [`traits`] describe the three collaborators it needs - a stream control
//! plane, a metrics backend, and a notification sink - and everything else
//! layers on top of those: [`client::ShardControl`] adds retries,
//! pagination, open-shard derivation, and settlement waits, and
//! `memory::InMemoryStreamService` (behind the `test-utilities` feature)
//! provides a rule-enforcing local implementation for tests and embedding
//! experiments.

pub mod client;
pub mod traits;

#[cfg(any(test, feature = "test-utilities"))]
pub mod memory;

pub use client::ShardControl;
pub use traits::{
    MetricDatapoint, MetricQuery, MetricsBackend, Notifier, ShardListing, StreamControlPlane,
    StreamDescription, StreamStatus,
};

#[cfg(any(test, feature = "test-utilities"))]
pub use memory::{InMemoryStreamService, PublishedNotification};

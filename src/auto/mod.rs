//! Metrics-driven autoscaling.
//!
//! The autoscaling stack, bottom up:
//!
//! - [`config`]: per-stream policies and the configuration document loader
//! - [`metrics_manager`]: capacity caching and utilisation sampling
//! - [`monitor`]: the per-stream vote-and-scale control loop
//! - [`controller`]: the host-owned supervisor running one monitor per
//!   configured stream
//!
//! # Embedding
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamshard::auto::{AutoscalingController, BackendProvider, ConfigLoader};
//!
//! # async fn host(provider: Arc<dyn BackendProvider>) -> streamshard::error::Result<()> {
//! let policies = ConfigLoader::load_from_url("/etc/streamshard/autoscaling.json").await?;
//! let controller = AutoscalingController::new(policies, provider)?;
//! let handle = controller.handle();
//!
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.stop();
//! });
//!
//! controller.run().await
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod metrics_manager;
pub mod monitor;

pub use config::{ConfigFetcher, ConfigLoader, ScalingPolicy, StreamPolicy};
pub use controller::{AutoscalingController, BackendProvider, ControllerHandle};
pub use metrics_manager::{MetricSeries, MetricsManager, UtilisationSeries};
pub use monitor::StreamMonitor;

//! Stream scaling API.
//!
//! [`StreamScaler`] is the public surface for scaling a stream up, down,
//! or to an exact shard count, bounded by optional min/max caps. Resizes
//! prefer the service's atomic shard-count update; when the service
//! rejects the target (invalid argument or limit exceeded) the scaler
//! falls back to the split/merge rebalancing engine.
//!
//! # Percentage semantics
//!
//! `scale_pct` carries two interpretations, switched on its value. This
//! preserves the behavior of long-standing deployments on both sides of
//! the switch; see [`new_shard_count`] for the full table. Configuration
//! documents pin each direction to a single form at validation time, while
//! the programmatic path accepts both and logs a warning when the additive
//! form is applied on scale-up.

mod engine;
mod report;

pub use report::{CompletionStatus, ScalingReport};

use std::sync::Arc;

use tracing::{info, warn};

use crate::control::client::ShardControl;
use crate::control::traits::StreamControlPlane;
use crate::error::{Result, ScalingError};
use crate::types::{ScaleBy, ScaleDirection};
use engine::TopologyEngine;

/// Compute the shard count a scale request targets, before any mutation.
///
/// | Direction | `scale_pct` | Interpretation | Formula |
/// |-----------|-------------|----------------|---------|
/// | UP   | > 100  | factor: grow *to* pct of current | `ceil(current x pct/100)` |
/// | UP   | <= 100 | delta: add pct of current        | `ceil(current + current x pct/100)` |
/// | DOWN | <= 100 | delta: remove pct of current     | `ceil(current - current x pct/100)` |
/// | DOWN | > 100  | factor: shrink *by* pct/100      | `floor(current x 100/pct)` |
///
/// A `scale_count` takes precedence over `scale_pct` when both are given.
/// The result is clamped to at least one shard and then to the
/// `[min_shards, max_shards]` interval.
pub fn new_shard_count(
    current: u32,
    scale_count: Option<u32>,
    scale_pct: Option<f64>,
    direction: ScaleDirection,
    min_shards: Option<u32>,
    max_shards: Option<u32>,
) -> Result<u32> {
    let raw = match (direction, scale_count, scale_pct) {
        (ScaleDirection::None, _, _) => current,
        (ScaleDirection::Up, Some(n), _) => {
            if n == 0 {
                return Err(ScalingError::InvalidArgument(
                    "shard count must be a positive number".to_string(),
                ));
            }
            current + n
        }
        (ScaleDirection::Down, Some(n), _) => {
            if n == 0 {
                return Err(ScalingError::InvalidArgument(
                    "shard count must be a positive number".to_string(),
                ));
            }
            current.saturating_sub(n)
        }
        (direction, None, Some(pct)) => {
            if pct <= 0.0 {
                return Err(ScalingError::InvalidArgument(
                    "scaling percent must be a positive number".to_string(),
                ));
            }
            let current = current as f64;
            let raw = match direction {
                ScaleDirection::Up if pct > 100.0 => (current * pct / 100.0).ceil(),
                ScaleDirection::Up => {
                    warn!(
                        pct,
                        "Scale-up percent at or below 100 is additive: growing by \
                         pct of current, not to it"
                    );
                    (current + current * pct / 100.0).ceil()
                }
                ScaleDirection::Down if pct > 100.0 => (current * 100.0 / pct).floor(),
                ScaleDirection::Down => (current - current * pct / 100.0).ceil(),
                ScaleDirection::None => unreachable!(),
            };
            raw as u32
        }
        (_, None, None) => {
            return Err(ScalingError::InvalidArgument(
                "either a scaling count or percentage is required".to_string(),
            ))
        }
    };

    let mut target = raw.max(1);
    if let Some(min) = min_shards {
        target = target.max(min);
    }
    if let Some(max) = max_shards {
        target = target.min(max);
    }
    Ok(target)
}

/// Scales a stream, prioritising eventual balance of the keyspace through
/// a left-leaning topology and low impact on the stream by making only one
/// shard modification at a time.
#[derive(Clone)]
pub struct StreamScaler {
    control: ShardControl,
}

impl StreamScaler {
    pub fn new(plane: Arc<dyn StreamControlPlane>) -> StreamScaler {
        StreamScaler {
            control: ShardControl::new(plane),
        }
    }

    /// Access the underlying retrying control shim.
    pub fn control(&self) -> &ShardControl {
        &self.control
    }

    /// Grow the stream by a count or percentage of its current shards.
    pub async fn scale_up(
        &self,
        stream: &str,
        by: ScaleBy,
        min_shards: Option<u32>,
        max_shards: Option<u32>,
    ) -> Result<ScalingReport> {
        let current = self.control.get_open_shard_count(stream).await? as u32;
        let target = self.target_for(current, by, ScaleDirection::Up, min_shards, max_shards)?;
        self.execute(stream, current, target, min_shards, max_shards, ScaleDirection::Up)
            .await
    }

    /// Shrink the stream by a count or percentage of its current shards.
    pub async fn scale_down(
        &self,
        stream: &str,
        by: ScaleBy,
        min_shards: Option<u32>,
        max_shards: Option<u32>,
    ) -> Result<ScalingReport> {
        let current = self.control.get_open_shard_count(stream).await? as u32;
        if current == 1 {
            return Err(ScalingError::AlreadyOneShard(stream.to_string()));
        }
        let target = self.target_for(current, by, ScaleDirection::Down, min_shards, max_shards)?;
        self.execute(stream, current, target, min_shards, max_shards, ScaleDirection::Down)
            .await
    }

    /// Resize the stream to an exact shard count. Unlike the directional
    /// operations, a resize to the current count still runs the engine, so
    /// it can be used to even out an unbalanced keyspace in place.
    pub async fn resize(
        &self,
        stream: &str,
        target_count: u32,
        min_shards: Option<u32>,
        max_shards: Option<u32>,
    ) -> Result<ScalingReport> {
        if target_count == 0 {
            return Err(ScalingError::InvalidArgument(
                "cannot resize to zero shards".to_string(),
            ));
        }
        let current = self.control.get_open_shard_count(stream).await? as u32;
        let mut target = target_count.max(1);
        if let Some(min) = min_shards {
            target = target.max(min);
        }
        if let Some(max) = max_shards {
            target = target.min(max);
        }

        let direction = match target.cmp(&current) {
            std::cmp::Ordering::Greater => ScaleDirection::Up,
            std::cmp::Ordering::Less => ScaleDirection::Down,
            std::cmp::Ordering::Equal => ScaleDirection::None,
        };

        let engine = TopologyEngine::new(self.control.clone());
        if direction == ScaleDirection::None {
            return engine
                .rebalance(stream, target, min_shards, max_shards, direction)
                .await;
        }
        self.execute(stream, current, target, min_shards, max_shards, direction)
            .await
    }

    /// Split one named shard into `into` pieces, leaving its siblings
    /// untouched.
    pub async fn scale_shard(
        &self,
        stream: &str,
        shard_id: &str,
        into: u32,
    ) -> Result<ScalingReport> {
        let engine = TopologyEngine::new(self.control.clone());
        engine
            .rebalance_shard(stream, shard_id, into, ScaleDirection::Up)
            .await
    }

    /// Report the stream's current open shard layout without scaling.
    pub async fn report(&self, stream: &str) -> Result<ScalingReport> {
        let layout = self.control.get_open_shards(stream).await?;
        Ok(ScalingReport::report_only(layout))
    }

    fn target_for(
        &self,
        current: u32,
        by: ScaleBy,
        direction: ScaleDirection,
        min_shards: Option<u32>,
        max_shards: Option<u32>,
    ) -> Result<u32> {
        match by {
            ScaleBy::Count(n) => {
                new_shard_count(current, Some(n), None, direction, min_shards, max_shards)
            }
            ScaleBy::Pct(p) => {
                new_shard_count(current, None, Some(p), direction, min_shards, max_shards)
            }
        }
    }

    async fn execute(
        &self,
        stream: &str,
        current: u32,
        target: u32,
        min_shards: Option<u32>,
        max_shards: Option<u32>,
        direction: ScaleDirection,
    ) -> Result<ScalingReport> {
        if target == current {
            let status = match direction {
                ScaleDirection::Up if max_shards == Some(current) => {
                    CompletionStatus::AlreadyAtMaximum
                }
                ScaleDirection::Down if min_shards == Some(current) => {
                    CompletionStatus::AlreadyAtMinimum
                }
                _ => CompletionStatus::NoActionRequired,
            };
            info!(stream, current, status = %status, "No scaling required");
            let layout = self.control.get_open_shards(stream).await?;
            return Ok(ScalingReport::new(status, direction, 0, layout));
        }

        // Prefer the atomic resize; the engine is the fallback for targets
        // the service will not honor in one call.
        match self.control.update_shard_count(stream, target).await {
            Ok(()) => {
                let layout = self.control.get_open_shards(stream).await?;
                return Ok(ScalingReport::new(CompletionStatus::Ok, direction, 1, layout));
            }
            Err(e @ (ScalingError::InvalidArgument(_) | ScalingError::Throttled(_))) => {
                info!(
                    stream,
                    target,
                    error = %e,
                    "Atomic shard count update refused, falling back to split/merge"
                );
            }
            Err(e) => return Err(e),
        }

        let engine = TopologyEngine::new(self.control.clone());
        engine
            .rebalance(stream, target, min_shards, max_shards, direction)
            .await
    }
}

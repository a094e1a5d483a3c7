//! Shard topology rebalancing engine.
//!
//! Converges a stream's open shard set to a target cardinality with
//! near-uniform keyspace shares, using the fewest provider mutations it
//! can while never holding more than one mutation in flight.
//!
//! # Algorithm
//!
//! The open set is sorted descending by start hash and pushed onto a
//! stack, so pops deliver shards in ascending keyspace order - the engine
//! finalizes the low end of the keyspace first, producing a left-leaning
//! balanced layout. For each popped shard S against target share `t`:
//!
//! - `S > t`: split S at offset `t`; the lower child is final, the higher
//!   child goes back on the stack.
//! - `S == t` (fuzzy): S is already the right size.
//! - `S < t`: pop the next shard H (adjacent by the coverage invariant).
//!   If `S + H > t`, split H at `t - S` and merge S with H's lower child,
//!   producing one exactly-sized shard; otherwise merge S and H outright
//!   and push the (still possibly undersized) result back.
//!
//! Every mutation blocks until the stream returns to `ACTIVE`, then
//! re-lists the catalog bounded below by the highest shard id seen so far
//! to resolve the newly created children.

use std::cmp::Ordering;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::control::client::ShardControl;
use crate::error::{Result, ScalingError};
use crate::hash::soft_cmp;
use crate::scaler::report::{CompletionStatus, ScalingReport};
use crate::shard::{AdjacentPair, ShardInfo};
use crate::types::ScaleDirection;

pub(crate) struct TopologyEngine {
    control: ShardControl,
}

impl TopologyEngine {
    pub fn new(control: ShardControl) -> TopologyEngine {
        TopologyEngine { control }
    }

    /// Rebalance the whole stream to `target_count` shards.
    pub async fn rebalance(
        &self,
        stream: &str,
        target_count: u32,
        min_shards: Option<u32>,
        max_shards: Option<u32>,
        direction: ScaleDirection,
    ) -> Result<ScalingReport> {
        if target_count == 0 {
            return Err(ScalingError::InvalidArgument(
                "cannot resize to zero shards".to_string(),
            ));
        }

        let open = self.control.get_open_shards(stream).await?;
        let current = open.len() as u32;
        let target_pct = 1.0 / target_count as f64;

        info!(
            stream,
            from = current,
            to = target_count,
            "Scaling stream shard topology"
        );

        let highest = open.highest_shard_id().map(str::to_string);
        let stack: Vec<ShardInfo> = open.iter_descending().cloned().collect();

        self.run(
            stream,
            stack,
            highest,
            current,
            target_count,
            target_pct,
            min_shards,
            max_shards,
            direction,
        )
        .await
    }

    /// Rebalance a single named shard into `into` pieces, leaving the rest
    /// of the stream untouched. The target share is what each shard would
    /// hold if the whole stream were scaled to the same degree.
    pub async fn rebalance_shard(
        &self,
        stream: &str,
        shard_id: &str,
        into: u32,
        direction: ScaleDirection,
    ) -> Result<ScalingReport> {
        if into == 0 {
            return Err(ScalingError::InvalidArgument(
                "cannot split a shard into zero pieces".to_string(),
            ));
        }

        let open = self.control.get_open_shards(stream).await?;
        let current = open.len() as u32;
        let shard = open
            .get(shard_id)
            .cloned()
            .ok_or_else(|| {
                ScalingError::NotFound(format!(
                    "shard {} is not open on stream {}",
                    shard_id, stream
                ))
            })?;

        let target_pct = 1.0 / (current * into) as f64;
        let highest = open.highest_shard_id().map(str::to_string);

        info!(
            stream,
            shard = shard_id,
            into,
            target_pct,
            "Scaling single shard"
        );

        self.run(
            stream,
            vec![shard],
            highest,
            current,
            current + into - 1,
            target_pct,
            None,
            None,
            direction,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        stream: &str,
        mut stack: Vec<ShardInfo>,
        mut highest_shard_id: Option<String>,
        mut current_count: u32,
        target_count: u32,
        target_pct: f64,
        min_shards: Option<u32>,
        max_shards: Option<u32>,
        direction: ScaleDirection,
    ) -> Result<ScalingReport> {
        let started = Instant::now();
        let mut operations_made = 0u32;
        let mut shards_completed = 0u32;

        loop {
            if let Some(min) = min_shards {
                if current_count == min && target_count <= min {
                    let status = if operations_made == 0 {
                        CompletionStatus::AlreadyAtMinimum
                    } else {
                        CompletionStatus::Ok
                    };
                    return self.finish(stream, status, direction, operations_made).await;
                }
            }
            if let Some(max) = max_shards {
                if current_count == max && target_count >= max {
                    let status = if operations_made == 0 {
                        CompletionStatus::AlreadyAtMaximum
                    } else {
                        CompletionStatus::Ok
                    };
                    return self.finish(stream, status, direction, operations_made).await;
                }
            }

            if shards_completed > 0 {
                report_progress(shards_completed, stack.len(), started);
            }

            let Some(lower) = stack.pop() else { break };

            match soft_cmp(lower.pct_width(), target_pct) {
                Ordering::Greater => {
                    // Too wide: the lower child of a split at the target
                    // offset is final.
                    let (_done, remainder) = self
                        .split(stream, &lower, target_pct, &mut highest_shard_id)
                        .await?;
                    operations_made += 1;
                    current_count += 1;
                    shards_completed += 1;
                    stack.push(remainder);
                }
                Ordering::Equal => {
                    shards_completed += 1;
                }
                Ordering::Less => {
                    // Too narrow: consume the adjacent higher shard.
                    let Some(higher) = stack.pop() else {
                        // The tail shard is undersized but there is nothing
                        // left to merge it with.
                        break;
                    };

                    let combined = lower.pct_width() + higher.pct_width();
                    if soft_cmp(combined, target_pct) == Ordering::Greater {
                        // Split the higher shard so that its lower child
                        // tops the current shard up to exactly the target.
                        let (h_low, h_high) = self
                            .split(
                                stream,
                                &higher,
                                target_pct - lower.pct_width(),
                                &mut highest_shard_id,
                            )
                            .await?;
                        operations_made += 1;
                        stack.push(h_high);

                        debug!(
                            stream,
                            lower = lower.shard_id(),
                            with = h_low.shard_id(),
                            "Merging shard with split remainder"
                        );
                        let _merged = self
                            .merge(stream, &lower, &h_low, &mut highest_shard_id)
                            .await?;
                        operations_made += 1;
                        shards_completed += 1;
                        // One split plus one merge leaves the count as it was.
                    } else {
                        let merged = self
                            .merge(stream, &lower, &higher, &mut highest_shard_id)
                            .await?;
                        operations_made += 1;
                        current_count -= 1;
                        // May still be undersized; reconsider it.
                        stack.push(merged);
                    }
                }
            }
        }

        self.finish(stream, CompletionStatus::Ok, direction, operations_made)
            .await
    }

    /// Split `shard` so its lower child holds `at_pct` of the keyspace,
    /// wait for the stream to settle, and resolve both children.
    async fn split(
        &self,
        stream: &str,
        shard: &ShardInfo,
        at_pct: f64,
        highest_shard_id: &mut Option<String>,
    ) -> Result<(ShardInfo, ShardInfo)> {
        let target_hash = shard.hash_at_pct_offset(at_pct);
        if target_hash <= shard.start_hash() || target_hash > shard.end_hash() {
            return Err(ScalingError::InvalidArgument(format!(
                "split point {} falls outside shard {}",
                target_hash,
                shard.shard_id()
            )));
        }

        debug!(
            stream,
            shard = shard.shard_id(),
            target_hash = %target_hash,
            at_pct,
            "Splitting shard"
        );

        self.control
            .split_shard(stream, shard.shard_id(), target_hash, true)
            .await?;

        let bound = highest_shard_id
            .clone()
            .unwrap_or_else(|| shard.shard_id().to_string());
        let after = self.control.get_open_shards_after(stream, &bound).await?;

        let mut lower = None;
        let mut higher = None;
        for info in after.iter() {
            if info.shard().parent_shard_id.as_deref() != Some(shard.shard_id()) {
                continue;
            }
            if info.start_hash() == shard.start_hash() {
                lower = Some(info.clone());
            } else if info.start_hash() == target_hash {
                higher = Some(info.clone());
            }
        }

        let (lower, higher) = match (lower, higher) {
            (Some(l), Some(h)) => (l, h),
            _ => {
                return Err(ScalingError::ResolutionFailure {
                    stream: stream.to_string(),
                    operation: "split".to_string(),
                })
            }
        };

        bump_highest(highest_shard_id, lower.shard_id());
        bump_highest(highest_shard_id, higher.shard_id());

        debug!(
            stream,
            lower = lower.shard_id(),
            higher = higher.shard_id(),
            "Split complete"
        );

        Ok((lower, higher))
    }

    /// Merge an adjacent pair, wait for settlement, and resolve the child.
    async fn merge(
        &self,
        stream: &str,
        lower: &ShardInfo,
        higher: &ShardInfo,
        highest_shard_id: &mut Option<String>,
    ) -> Result<ShardInfo> {
        let pair = AdjacentPair::new(lower.clone(), higher.clone())?;

        self.control
            .merge_shards(stream, pair.lower().shard_id(), pair.higher().shard_id(), true)
            .await?;

        let bound = highest_shard_id
            .clone()
            .unwrap_or_else(|| higher.shard_id().to_string());
        let after = self.control.get_open_shards_after(stream, &bound).await?;

        let merged = after
            .iter()
            .find(|info| {
                info.shard().parent_shard_id.as_deref() == Some(lower.shard_id())
                    && info.shard().adjacent_parent_shard_id.as_deref()
                        == Some(higher.shard_id())
            })
            .cloned()
            .ok_or_else(|| ScalingError::ResolutionFailure {
                stream: stream.to_string(),
                operation: "merge".to_string(),
            })?;

        bump_highest(highest_shard_id, merged.shard_id());

        debug!(
            stream,
            merged = merged.shard_id(),
            pct_width = merged.pct_width(),
            "Merge complete"
        );

        Ok(merged)
    }

    async fn finish(
        &self,
        stream: &str,
        status: CompletionStatus,
        direction: ScaleDirection,
        operations_made: u32,
    ) -> Result<ScalingReport> {
        let layout = self.control.get_open_shards(stream).await?;
        Ok(ScalingReport::new(status, direction, operations_made, layout))
    }
}

fn bump_highest(highest: &mut Option<String>, candidate: &str) {
    match highest {
        Some(current) if current.as_str() >= candidate => {}
        _ => *highest = Some(candidate.to_string()),
    }
}

fn report_progress(completed: u32, remaining: usize, started: Instant) {
    let total = completed as f64 + remaining as f64;
    let pct_complete = completed as f64 / total;
    let est_remaining_secs =
        (started.elapsed().as_secs_f64() / pct_complete * (1.0 - pct_complete)) as u64;
    info!(
        pct_complete = format!("{:.0}%", pct_complete * 100.0).as_str(),
        in_process = remaining,
        est_remaining_secs,
        "Shard modification progress"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_highest_keeps_maximum() {
        let mut highest = None;
        bump_highest(&mut highest, "shardId-000000000004");
        assert_eq!(highest.as_deref(), Some("shardId-000000000004"));

        bump_highest(&mut highest, "shardId-000000000002");
        assert_eq!(highest.as_deref(), Some("shardId-000000000004"));

        bump_highest(&mut highest, "shardId-000000000010");
        assert_eq!(highest.as_deref(), Some("shardId-000000000010"));
    }
}

//! Per-stream autoscaling control loop.
//!
//! A [`StreamMonitor`] owns one stream's policy, metrics state, and
//! cooldown clocks. Every `checkIntervalSec` it samples utilisation over
//! the policy's window, lets each in-scope operation class cast a vote,
//! combines the votes, and - cooldowns permitting - drives the scaler.
//!
//! # Votes
//!
//! Per operation, the *governing metric* is whichever capacity dimension
//! (bytes/sec or records/sec) shows the higher average utilisation; its
//! high/low sample counts decide the operation's vote. Samples the backend
//! never produced count as low: an idle stream reports nothing, and
//! nothing is the strongest possible signal to scale down.
//!
//! Votes combine so that any UP wins, otherwise any DOWN wins:
//!
//! | | PUT=UP | PUT=NONE | PUT=DOWN |
//! |----------|------|------|------|
//! | GET=UP   | UP   | UP   | UP   |
//! | GET=NONE | UP   | NONE | DOWN |
//! | GET=DOWN | UP   | DOWN | DOWN |
//!
//! Scaling runs inline in the cycle: the next evaluation starts only after
//! the action (and its settlement wait) completes, so a monitor never has
//! two mutations of its stream in flight.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::auto::config::{ScalingPolicy, StreamPolicy};
use crate::auto::metrics_manager::{MetricSeries, MetricsManager, UtilisationSeries};
use crate::control::traits::{MetricsBackend, Notifier, StreamControlPlane};
use crate::error::{Result, ScalingError};
use crate::metrics;
use crate::scaler::{CompletionStatus, ScalingReport, StreamScaler};
use crate::shard::OpenShardSet;
use crate::types::{ScaleBy, ScaleDirection, StreamMetric};

/// High/low sample counts and averages for one capacity dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DimensionSummary {
    pub metric: StreamMetric,
    pub high_samples: u32,
    pub low_samples: u32,
    pub avg_pct: f64,
    pub latest_pct: f64,
}

/// Summarize one dimension's samples against its capacity limit.
///
/// `window_mins` one-minute samples are expected; periods with no sample
/// pad the low count (when a scale-down policy exists to consume them) and
/// count as zero utilisation in the average.
pub(crate) fn summarize_dimension(
    metric: StreamMetric,
    series: Option<&MetricSeries>,
    limit: f64,
    window_mins: u32,
    scale_up: Option<&ScalingPolicy>,
    scale_down: Option<&ScalingPolicy>,
) -> DimensionSummary {
    let mut high = 0u32;
    let mut low = 0u32;
    let mut total_pct = 0.0;
    let mut latest: Option<(chrono::DateTime<Utc>, f64)> = None;
    let mut samples = 0u32;

    if let Some(series) = series {
        for (timestamp, value) in series {
            let pct = if limit > 0.0 { value / limit } else { 0.0 };
            samples += 1;
            total_pct += pct;

            if let Some(up) = scale_up {
                if pct > up.threshold_pct / 100.0 {
                    high += 1;
                }
            }
            if let Some(down) = scale_down {
                if pct < down.threshold_pct / 100.0 {
                    low += 1;
                }
            }

            match latest {
                Some((t, _)) if t >= *timestamp => {}
                _ => latest = Some((*timestamp, pct)),
            }
        }
    }

    // Pad the window: minutes with no datapoint are low samples.
    if scale_down.is_some() && samples < window_mins {
        low += window_mins - samples;
    }

    let avg_pct = if window_mins > 0 {
        total_pct / window_mins as f64
    } else {
        0.0
    };

    DimensionSummary {
        metric,
        high_samples: high,
        low_samples: low,
        avg_pct,
        latest_pct: latest.map(|(_, p)| p).unwrap_or(0.0),
    }
}

/// Choose an operation's vote from its per-dimension summaries.
pub(crate) fn operation_vote(
    summaries: &[DimensionSummary],
    scale_up: Option<&ScalingPolicy>,
    scale_down: Option<&ScalingPolicy>,
) -> (ScaleDirection, Option<DimensionSummary>) {
    let governing = summaries
        .iter()
        .copied()
        .max_by(|a, b| a.avg_pct.total_cmp(&b.avg_pct));

    let Some(governing) = governing else {
        return (ScaleDirection::None, None);
    };

    if let Some(up) = scale_up {
        if governing.high_samples >= up.after_mins {
            return (ScaleDirection::Up, Some(governing));
        }
    }
    if let Some(down) = scale_down {
        if governing.low_samples >= down.after_mins {
            return (ScaleDirection::Down, Some(governing));
        }
    }
    (ScaleDirection::None, Some(governing))
}

/// Combine per-operation votes: any UP wins, otherwise any DOWN wins.
pub(crate) fn combine_votes(votes: &[ScaleDirection]) -> ScaleDirection {
    if votes.iter().any(|v| *v == ScaleDirection::Up) {
        ScaleDirection::Up
    } else if votes.iter().any(|v| *v == ScaleDirection::Down) {
        ScaleDirection::Down
    } else {
        ScaleDirection::None
    }
}

/// Autoscaling monitor for a single stream.
pub struct StreamMonitor {
    policy: StreamPolicy,
    scaler: StreamScaler,
    metrics_manager: MetricsManager,
    notifier: Option<Arc<dyn Notifier>>,
    report_tx: Option<mpsc::UnboundedSender<ScalingReport>>,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
    last_capacity_refresh: Instant,
}

impl StreamMonitor {
    pub fn new(
        policy: StreamPolicy,
        control_plane: Arc<dyn StreamControlPlane>,
        metrics_backend: Arc<dyn MetricsBackend>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> StreamMonitor {
        let scaler = StreamScaler::new(control_plane);
        let metrics_manager = MetricsManager::new(
            policy.stream_name.clone(),
            policy.scale_on_operations.clone(),
            metrics_backend,
            scaler.control().clone(),
        );

        StreamMonitor {
            policy,
            scaler,
            metrics_manager,
            notifier,
            report_tx: None,
            last_scale_up: None,
            last_scale_down: None,
            last_capacity_refresh: Instant::now(),
        }
    }

    /// Emit every terminal [`ScalingReport`] on the given channel, in
    /// addition to logging it.
    pub fn with_report_channel(mut self, tx: mpsc::UnboundedSender<ScalingReport>) -> StreamMonitor {
        self.report_tx = Some(tx);
        self
    }

    pub fn stream_name(&self) -> &str {
        &self.policy.stream_name
    }

    /// The monitor's metrics state, exposed for capacity inspection.
    pub fn metrics_manager(&self) -> &MetricsManager {
        &self.metrics_manager
    }

    /// Load (or reload) the stream's maximum capacity. [`run`](Self::run)
    /// does this before its first cycle; callers driving
    /// [`run_cycle`](Self::run_cycle) directly must do it themselves.
    pub async fn refresh_capacity(&mut self) -> Result<()> {
        self.metrics_manager.load_max_capacity().await?;
        self.last_capacity_refresh = Instant::now();
        Ok(())
    }

    /// Run the monitor until `stop` signals or a cycle fails.
    ///
    /// Cancellation is cooperative: a stop observed mid-cycle takes effect
    /// once the current network call chain returns.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Result<()> {
        info!(stream = %self.policy.stream_name, "Started stream monitor");

        self.refresh_capacity().await?;

        let mut ticker = tokio::time::interval(self.policy.check_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    let stop_requested = changed.is_err() || *stop.borrow();
                    if stop_requested {
                        info!(stream = %self.policy.stream_name, "Stream monitor stopping");
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(
                            stream = %self.policy.stream_name,
                            error = %e,
                            "Stream monitor cycle failed"
                        );
                        self.emit_error_report().await;
                        return Err(e);
                    }
                }
            }
        }
    }

    /// One evaluation cycle: sample, vote, and maybe scale.
    pub async fn run_cycle(&mut self) -> Result<()> {
        let window_mins = self.policy.window_mins();
        let end = Utc::now();
        let start = end - chrono::Duration::minutes(window_mins as i64);

        let utilisation = self
            .metrics_manager
            .query_current_utilisation(start, end)
            .await?;

        let decision = self.evaluate(&utilisation, window_mins);
        metrics::MONITOR_DECISIONS
            .with_label_values(&[self.policy.stream_name.as_str(), decision.to_string().as_str()])
            .inc();

        match decision {
            ScaleDirection::Up => self.act(ScaleDirection::Up).await?,
            ScaleDirection::Down => self.act(ScaleDirection::Down).await?,
            ScaleDirection::None => {
                debug!(stream = %self.policy.stream_name, "No scaling directive");
            }
        }

        if self.last_capacity_refresh.elapsed() >= self.policy.refresh_shards_after() {
            self.metrics_manager.load_max_capacity().await?;
            self.last_capacity_refresh = Instant::now();
        }

        Ok(())
    }

    /// Combine per-operation votes over the sampled window.
    fn evaluate(&self, utilisation: &UtilisationSeries, window_mins: u32) -> ScaleDirection {
        let up = self.policy.scale_up.as_ref();
        let down = self.policy.scale_down.as_ref();
        let mut votes = Vec::with_capacity(self.policy.scale_on_operations.len());

        for op in &self.policy.scale_on_operations {
            let Some(capacity) = self.metrics_manager.max_capacity(*op) else {
                warn!(stream = %self.policy.stream_name, operation = %op,
                      "No capacity loaded; skipping operation");
                continue;
            };

            let summaries: Vec<DimensionSummary> = StreamMetric::ALL
                .iter()
                .map(|metric| {
                    summarize_dimension(
                        *metric,
                        utilisation.series(*op, *metric),
                        capacity.limit(*metric),
                        window_mins,
                        up,
                        down,
                    )
                })
                .collect();

            let (vote, governing) = operation_vote(&summaries, up, down);
            if let Some(g) = governing {
                info!(
                    stream = %self.policy.stream_name,
                    operation = %op,
                    governing_metric = %g.metric,
                    used_capacity_pct = format!("{:.2}%", g.latest_pct * 100.0).as_str(),
                    high_samples = g.high_samples,
                    low_samples = g.low_samples,
                    vote = %vote,
                    "Operation vote"
                );
            }
            votes.push(vote);
        }

        combine_votes(&votes)
    }

    /// Execute a scaling decision, honoring the direction's cooldown.
    async fn act(&mut self, direction: ScaleDirection) -> Result<()> {
        let (policy, last_action) = match direction {
            ScaleDirection::Up => (self.policy.scale_up.as_ref(), self.last_scale_up),
            ScaleDirection::Down => (self.policy.scale_down.as_ref(), self.last_scale_down),
            ScaleDirection::None => return Ok(()),
        };
        let Some(policy) = policy.cloned() else {
            // Voted in a direction the stream does not configure.
            return Ok(());
        };

        if let Some(last) = last_action {
            let cool_off = policy.cool_off();
            if last.elapsed() < cool_off {
                info!(
                    stream = %self.policy.stream_name,
                    direction = %direction,
                    cool_off_mins = policy.cool_off_mins,
                    "Deferring scaling action until cool-off elapses"
                );
                // A deferral is still a terminal decision, so it still
                // yields a report; it just never arms clocks or notifies.
                let layout = self
                    .scaler
                    .control()
                    .get_open_shards(&self.policy.stream_name)
                    .await
                    .unwrap_or_default();
                let report = ScalingReport::new(
                    CompletionStatus::NoActionRequired,
                    direction,
                    0,
                    layout,
                );
                self.emit_report(&report);
                return Ok(());
            }
        }

        let by = match (policy.scale_count, policy.scale_pct) {
            (Some(n), _) => ScaleBy::Count(n),
            (None, Some(p)) => ScaleBy::Pct(p),
            (None, None) => {
                // Unreachable for validated policies.
                return Err(ScalingError::InvalidConfiguration(format!(
                    "stream {} has a scaling policy with no magnitude",
                    self.policy.stream_name
                )));
            }
        };

        info!(
            stream = %self.policy.stream_name,
            direction = %direction,
            threshold_pct = policy.threshold_pct,
            after_mins = policy.after_mins,
            "Executing scaling action"
        );

        let outcome = match direction {
            ScaleDirection::Up => {
                self.scaler
                    .scale_up(
                        &self.policy.stream_name,
                        by,
                        self.policy.min_shards,
                        self.policy.max_shards,
                    )
                    .await
            }
            ScaleDirection::Down => {
                self.scaler
                    .scale_down(
                        &self.policy.stream_name,
                        by,
                        self.policy.min_shards,
                        self.policy.max_shards,
                    )
                    .await
            }
            ScaleDirection::None => unreachable!(),
        };

        match outcome {
            Ok(report) => self.absorb_report(direction, policy, report).await,
            Err(ScalingError::AlreadyOneShard(stream)) => {
                // Not scaling down: the stream is at its floor already.
                debug!(stream = %stream, "Not scaling down - already at one shard");
                let layout = self
                    .scaler
                    .control()
                    .get_open_shards(&self.policy.stream_name)
                    .await
                    .unwrap_or_default();
                let report = ScalingReport::new(
                    CompletionStatus::AlreadyAtMinimum,
                    direction,
                    0,
                    layout,
                );
                self.emit_report(&report);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Record cooldowns, refresh capacity, notify, and emit the report.
    async fn absorb_report(
        &mut self,
        direction: ScaleDirection,
        policy: ScalingPolicy,
        report: ScalingReport,
    ) -> Result<()> {
        metrics::SCALING_ACTIONS
            .with_label_values(&[
                self.policy.stream_name.as_str(),
                direction.to_string().as_str(),
                report.end_status.to_string().as_str(),
            ])
            .inc();

        match report.end_status {
            CompletionStatus::Ok => {
                match direction {
                    ScaleDirection::Up => self.last_scale_up = Some(Instant::now()),
                    ScaleDirection::Down => self.last_scale_down = Some(Instant::now()),
                    ScaleDirection::None => {}
                }

                self.metrics_manager.load_max_capacity().await?;
                self.last_capacity_refresh = Instant::now();

                if let (Some(notifier), Some(target)) =
                    (self.notifier.as_ref(), policy.notification_target.as_ref())
                {
                    let subject = match direction {
                        ScaleDirection::Down => "Kinesis Autoscaling - Scale Down",
                        _ => "Kinesis Autoscaling - Scale Up",
                    };
                    let body = if notifier.accepts_json() {
                        report.as_json().unwrap_or_else(|_| report.to_string())
                    } else {
                        format!(
                            "Completed scaling of stream {}\n{}",
                            self.policy.stream_name, report
                        )
                    };
                    if let Err(e) = notifier.publish(target, subject, &body).await {
                        // Notification failures never fail the action.
                        warn!(
                            stream = %self.policy.stream_name,
                            target = %target,
                            error = %e,
                            "Failed to publish scaling notification"
                        );
                    }
                }

                info!(stream = %self.policy.stream_name, "{}", report);
            }
            CompletionStatus::AlreadyAtMinimum
            | CompletionStatus::AlreadyAtMaximum
            | CompletionStatus::NoActionRequired => {
                // Capped or no-op decisions leave cooldown clocks untouched.
                info!(
                    stream = %self.policy.stream_name,
                    status = %report.end_status,
                    "Scaling action made no change"
                );
            }
            CompletionStatus::ReportOnly | CompletionStatus::Error => {}
        }

        self.emit_report(&report);
        Ok(())
    }

    fn emit_report(&self, report: &ScalingReport) {
        if let Some(tx) = &self.report_tx {
            let _ = tx.send(report.clone());
        }
    }

    async fn emit_error_report(&self) {
        let layout = self
            .scaler
            .control()
            .get_open_shards(&self.policy.stream_name)
            .await
            .unwrap_or_else(|_| OpenShardSet::new());
        let report = ScalingReport::new(
            CompletionStatus::Error,
            ScaleDirection::None,
            0,
            layout,
        );
        self.emit_report(&report);
    }
}

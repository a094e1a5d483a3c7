//! Process-wide autoscaling supervision.
//!
//! [`AutoscalingController`] owns one [`StreamMonitor`] task per configured
//! [`StreamPolicy`]. It is an explicit value owned by the host - a daemon
//! main, a service shutdown hook - not a process singleton, and it never
//! exits the process itself: fatal conditions surface as errors for the
//! host to act on.
//!
//! The controller sweeps its monitors once per minute. A monitor that
//! returns an error (or panics) brings the whole controller down: every
//! other monitor is signalled to stop and joined before the error is
//! returned. A host that wants a stay-alive stance catches the error and
//! restarts.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::auto::config::StreamPolicy;
use crate::auto::monitor::StreamMonitor;
use crate::constants::SUPERVISOR_POLL_SECS;
use crate::control::traits::{MetricsBackend, Notifier, StreamControlPlane};
use crate::error::{Result, ScalingError};
use crate::scaler::ScalingReport;

/// Constructs the external collaborators each monitor needs.
///
/// Called once per policy at startup, so hosts can build region-scoped
/// clients per stream. Clients are owned by their monitor; the provider
/// itself is only consulted during startup.
pub trait BackendProvider: Send + Sync {
    fn control_plane(&self, policy: &StreamPolicy) -> Arc<dyn StreamControlPlane>;
    fn metrics_backend(&self, policy: &StreamPolicy) -> Arc<dyn MetricsBackend>;
    fn notifier(&self, policy: &StreamPolicy) -> Option<Arc<dyn Notifier>>;
}

/// Remote control for a running [`AutoscalingController`].
#[derive(Clone)]
pub struct ControllerHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl ControllerHandle {
    /// Ask the controller to stop all monitors and return.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

struct MonitorTask {
    stream: String,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

/// Supervisor for one monitor per configured stream policy.
pub struct AutoscalingController {
    policies: Vec<StreamPolicy>,
    provider: Arc<dyn BackendProvider>,
    report_tx: Option<mpsc::UnboundedSender<ScalingReport>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AutoscalingController {
    /// Build a controller over a validated policy set. An empty set is a
    /// configuration error: a controller with nothing to supervise is
    /// always a deployment mistake.
    pub fn new(
        policies: Vec<StreamPolicy>,
        provider: Arc<dyn BackendProvider>,
    ) -> Result<AutoscalingController> {
        if policies.is_empty() {
            return Err(ScalingError::InvalidConfiguration(
                "autoscaling controller requires at least one stream policy".to_string(),
            ));
        }
        for policy in &policies {
            policy.validate()?;
        }

        let (shutdown, _) = watch::channel(false);
        Ok(AutoscalingController {
            policies,
            provider,
            report_tx: None,
            shutdown: Arc::new(shutdown),
        })
    }

    /// Emit every terminal scaling report on `tx`.
    pub fn with_report_channel(
        mut self,
        tx: mpsc::UnboundedSender<ScalingReport>,
    ) -> AutoscalingController {
        self.report_tx = Some(tx);
        self
    }

    /// A handle the host can use to stop the controller from elsewhere.
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn stream_count(&self) -> usize {
        self.policies.len()
    }

    /// Run every monitor until shutdown is requested or a monitor fails.
    pub async fn run(self) -> Result<()> {
        info!(
            monitors = self.policies.len(),
            "Starting autoscaling controller"
        );

        let mut monitors = Vec::with_capacity(self.policies.len());
        for policy in &self.policies {
            info!(stream = %policy.stream_name, "Creating stream monitor");

            let mut monitor = StreamMonitor::new(
                policy.clone(),
                self.provider.control_plane(policy),
                self.provider.metrics_backend(policy),
                self.provider.notifier(policy),
            );
            if let Some(tx) = &self.report_tx {
                monitor = monitor.with_report_channel(tx.clone());
            }

            let (stop_tx, stop_rx) = watch::channel(false);
            let stream = policy.stream_name.clone();
            let task = tokio::spawn(monitor.run(stop_rx));

            monitors.push(MonitorTask {
                stream,
                stop_tx,
                task,
            });
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut sweep =
            tokio::time::interval(std::time::Duration::from_secs(SUPERVISOR_POLL_SECS));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately; consume it so the
        // first health sweep happens one period in.
        sweep.tick().await;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Autoscaling controller shutdown requested");
                        Self::stop_all(monitors).await;
                        return Ok(());
                    }
                }
                _ = sweep.tick() => {
                    match Self::sweep_finished(&mut monitors).await {
                        Ok(()) if monitors.is_empty() => {
                            info!("All stream monitors completed");
                            return Ok(());
                        }
                        Ok(()) => {}
                        Err(e) => {
                            error!(error = %e, "Stream monitor failed; stopping all monitors");
                            Self::stop_all(monitors).await;
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Reap finished monitors, surfacing the first failure.
    async fn sweep_finished(monitors: &mut Vec<MonitorTask>) -> Result<()> {
        let mut failure: Option<ScalingError> = None;

        let mut index = 0;
        while index < monitors.len() {
            if !monitors[index].task.is_finished() {
                index += 1;
                continue;
            }

            let finished = monitors.swap_remove(index);
            match finished.task.await {
                Ok(Ok(())) => {
                    info!(stream = %finished.stream, "Stream monitor completed");
                }
                Ok(Err(e)) => {
                    error!(stream = %finished.stream, error = %e, "Stream monitor failed");
                    failure.get_or_insert(e);
                }
                Err(join_err) => {
                    error!(stream = %finished.stream, error = %join_err,
                           "Stream monitor panicked");
                    failure.get_or_insert(ScalingError::Backend(format!(
                        "monitor for stream {} panicked: {}",
                        finished.stream, join_err
                    )));
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Signal every monitor to stop, then join each in turn.
    async fn stop_all(monitors: Vec<MonitorTask>) {
        for monitor in &monitors {
            info!(stream = %monitor.stream, "Stopping stream monitor");
            let _ = monitor.stop_tx.send(true);
        }
        for monitor in monitors {
            match monitor.task.await {
                Ok(Ok(())) => info!(stream = %monitor.stream, "Stream monitor stopped"),
                Ok(Err(e)) => {
                    warn!(stream = %monitor.stream, error = %e,
                          "Stream monitor exited with error during shutdown")
                }
                Err(join_err) => {
                    warn!(stream = %monitor.stream, error = %join_err,
                          "Stream monitor panicked during shutdown")
                }
            }
        }
    }
}

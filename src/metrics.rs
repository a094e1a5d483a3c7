//! Prometheus metrics for scaling and monitoring.
//!
//! All metrics register against a custom registry with the `streamshard`
//! prefix so embedding hosts never collide with other libraries using the
//! default registry. Registration failures fall back to unregistered
//! metrics instead of panicking.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tracing::warn;

/// Custom registry for all streamshard metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("streamshard".to_string()), None).unwrap_or_else(|_| Registry::new())
});

fn register_counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .unwrap_or_else(|e| panic!("invalid metric definition {}: {}", name, e));
    if let Err(e) = REGISTRY.register(Box::new(counter.clone())) {
        warn!(metric = name, error = %e, "Failed to register metric");
    }
    counter
}

fn register_gauge_vec(name: &str, help: &str, labels: &[&str]) -> IntGaugeVec {
    let gauge = IntGaugeVec::new(Opts::new(name, help), labels)
        .unwrap_or_else(|e| panic!("invalid metric definition {}: {}", name, e));
    if let Err(e) = REGISTRY.register(Box::new(gauge.clone())) {
        warn!(metric = name, error = %e, "Failed to register metric");
    }
    gauge
}

/// Shard mutations issued, by stream and mutation kind (split/merge/update).
pub static SHARD_MUTATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "shard_mutations_total",
        "Shard mutations issued against the control plane",
        &["stream", "kind"],
    )
});

/// Completed scaling actions, by stream, direction, and end status.
pub static SCALING_ACTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "scaling_actions_total",
        "Scaling actions completed, labelled with their end status",
        &["stream", "direction", "status"],
    )
});

/// Monitor evaluation cycles, by stream and resulting decision.
pub static MONITOR_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "monitor_decisions_total",
        "Autoscaling monitor decisions per evaluation cycle",
        &["stream", "decision"],
    )
});

/// Current open shard count per monitored stream.
pub static OPEN_SHARDS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_gauge_vec(
        "open_shards",
        "Open shards last observed per stream",
        &["stream"],
    )
});

/// Retry outcomes per operation.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "retry_attempts_total",
        "Retry attempts, successes and exhaustions by operation",
        &["operation", "outcome"],
    )
});

/// Record a retry attempt for an operation.
pub fn record_retry_attempt(operation: &str, attempt: u32) {
    RETRY_ATTEMPTS
        .with_label_values(&[operation, "attempt"])
        .inc();
    tracing::debug!(operation, attempt, "Retry attempt");
}

/// Record that an operation eventually succeeded after retrying.
pub fn record_retry_success(operation: &str) {
    RETRY_ATTEMPTS
        .with_label_values(&[operation, "success"])
        .inc();
}

/// Record that an operation exhausted its retry budget.
pub fn record_retry_exhausted(operation: &str) {
    RETRY_ATTEMPTS
        .with_label_values(&[operation, "exhausted"])
        .inc();
}

/// Render all streamshard metrics in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

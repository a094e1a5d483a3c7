//! Service constants for stream scaling.
//!
//! These values mirror the published per-shard limits and throttling
//! characteristics of the stream service. They are compiled in rather than
//! configured: the service does not allow them to be changed, and treating
//! them as configuration invites drift between deployments.

/// Maximum ingest bytes per second for a single shard (PUT path).
pub const PUT_BYTES_PER_SHARD: u64 = 1_048_576;

/// Maximum ingest records per second for a single shard (PUT path).
pub const PUT_RECORDS_PER_SHARD: u64 = 1_000;

/// Maximum egress bytes per second for a single shard (GET path).
pub const GET_BYTES_PER_SHARD: u64 = 2_097_152;

/// Maximum egress records per second for a single shard (GET path).
pub const GET_RECORDS_PER_SHARD: u64 = 2_000;

/// Metric namespace the stream service publishes under.
pub const METRICS_NAMESPACE: &str = "AWS/Kinesis";

/// The sole dimension used when querying stream metrics.
pub const STREAM_NAME_DIMENSION: &str = "StreamName";

/// Period of one utilisation sample, in seconds. Samples arrive as sums
/// over this period and are divided by it to obtain per-second rates.
pub const METRIC_PERIOD_SECS: u32 = 60;

/// Maximum attempts for a mutating or listing control-plane call.
pub const MODIFY_RETRIES: u32 = 10;

/// Base delay for throttling backoff. The service throttles control-plane
/// calls beyond roughly 10/sec, so the first retry waits at least this long.
pub const THROTTLE_BASE_DELAY_MS: u64 = 100;

/// Ceiling on a single throttling backoff sleep.
pub const THROTTLE_MAX_DELAY_MS: u64 = 2_000;

/// Attempt count cap used when computing throttle backoff.
pub const THROTTLE_ATTEMPT_CAP: u32 = 20;

/// Sleep before retrying when the stream reports a mutation in flight.
pub const RESOURCE_IN_USE_DELAY_MS: u64 = 1_000;

/// Initial wait after issuing a mutation, before the first status poll.
/// Shard mutations take tens of seconds to settle; polling earlier is noise.
pub const WAIT_FOR_ACTIVE_INITIAL_SECS: u64 = 20;

/// Interval between status polls after the initial wait.
pub const WAIT_FOR_ACTIVE_POLL_SECS: u64 = 1;

/// Default seconds between monitor evaluation cycles.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 45;

/// Default minutes between unconditional stream capacity refreshes, which
/// absorb shard-count changes made outside the autoscaler.
pub const DEFAULT_REFRESH_SHARDS_AFTER_MINS: u64 = 10;

/// Seconds between supervisor health sweeps over running monitors.
pub const SUPERVISOR_POLL_SECS: u64 = 60;

/// Decimal scale at which keyspace percentages are compared. Shares are
/// rounded half-down to this many places before comparison; the accepted
/// variation is one unit at one order of magnitude above this scale.
pub const PCT_COMPARISON_SCALE: i32 = 10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_caps_are_double_put_caps() {
        assert_eq!(GET_BYTES_PER_SHARD, PUT_BYTES_PER_SHARD * 2);
        assert_eq!(GET_RECORDS_PER_SHARD, PUT_RECORDS_PER_SHARD * 2);
    }

    #[test]
    fn test_throttle_delays_are_ordered() {
        assert!(THROTTLE_BASE_DELAY_MS < THROTTLE_MAX_DELAY_MS);
    }
}

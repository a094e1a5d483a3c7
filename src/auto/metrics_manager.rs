//! Stream utilisation metrics.
//!
//! [`MetricsManager`] owns two things for one monitored stream: the cached
//! maximum capacity per tracked operation class (open shard count times the
//! per-shard caps), and the prepared metric query templates used to sample
//! utilisation each cycle.
//!
//! The service reports PUT load across four metric series (single and
//! batched puts, bytes and records) and GET load across two. Queries run
//! once per template; datapoints are bucketed by operation and by the
//! dimension their unit declares, converted from per-period sums to
//! per-second rates, and *added* when two series share a timestamp - that
//! is how `PutRecord.*` and `PutRecords.*` combine into one PUT series.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use backon::Retryable;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::constants::{METRICS_NAMESPACE, METRIC_PERIOD_SECS, STREAM_NAME_DIMENSION};
use crate::control::client::ShardControl;
use crate::control::traits::{MetricQuery, MetricsBackend};
use crate::error::Result;
use crate::retry::metrics_policy;
use crate::types::{OperationType, StreamCapacity, StreamMetric};

/// Per-second utilisation samples keyed by timestamp.
pub type MetricSeries = BTreeMap<DateTime<Utc>, f64>;

/// Utilisation samples bucketed by operation and capacity dimension.
#[derive(Debug, Default, Clone)]
pub struct UtilisationSeries {
    buckets: HashMap<(OperationType, StreamMetric), MetricSeries>,
}

impl UtilisationSeries {
    pub fn series(&self, operation: OperationType, metric: StreamMetric) -> Option<&MetricSeries> {
        self.buckets.get(&(operation, metric))
    }

    fn add_sample(
        &mut self,
        operation: OperationType,
        metric: StreamMetric,
        timestamp: DateTime<Utc>,
        rate: f64,
    ) {
        *self
            .buckets
            .entry((operation, metric))
            .or_default()
            .entry(timestamp)
            .or_insert(0.0) += rate;
    }
}

/// Capacity cache and utilisation query engine for one stream.
pub struct MetricsManager {
    stream_name: String,
    tracked: Vec<OperationType>,
    backend: Arc<dyn MetricsBackend>,
    control: ShardControl,
    capacity: HashMap<OperationType, StreamCapacity>,
    templates: Vec<(OperationType, MetricQuery)>,
}

impl MetricsManager {
    pub fn new(
        stream_name: impl Into<String>,
        tracked: Vec<OperationType>,
        backend: Arc<dyn MetricsBackend>,
        control: ShardControl,
    ) -> MetricsManager {
        let stream_name = stream_name.into();

        let templates = tracked
            .iter()
            .flat_map(|op| {
                op.metrics_to_fetch().iter().map(|name| {
                    (
                        *op,
                        MetricQuery {
                            namespace: METRICS_NAMESPACE.to_string(),
                            metric_name: (*name).to_string(),
                            dimension_name: STREAM_NAME_DIMENSION.to_string(),
                            dimension_value: stream_name.clone(),
                            period_secs: METRIC_PERIOD_SECS,
                        },
                    )
                })
            })
            .collect();

        MetricsManager {
            stream_name,
            tracked,
            backend,
            control,
            capacity: HashMap::new(),
            templates,
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn tracked_operations(&self) -> &[OperationType] {
        &self.tracked
    }

    /// Refresh the cached maximum capacity from the current open shard
    /// count. Returns the shard count observed.
    pub async fn load_max_capacity(&mut self) -> Result<usize> {
        debug!(stream = %self.stream_name, "Refreshing stream throughput information");
        let open_shards = self
            .control
            .get_open_shard_count(&self.stream_name)
            .await?;

        for op in &self.tracked {
            let capacity = StreamCapacity::for_shards(*op, open_shards as u64);
            debug!(
                stream = %self.stream_name,
                operation = %op,
                open_shards,
                bytes_per_sec = capacity.bytes_per_sec,
                records_per_sec = capacity.records_per_sec,
                "Stream capacity"
            );
            self.capacity.insert(*op, capacity);
        }
        Ok(open_shards)
    }

    /// The cached capacity for one operation class, if loaded.
    pub fn max_capacity(&self, operation: OperationType) -> Option<StreamCapacity> {
        self.capacity.get(&operation).copied()
    }

    /// Execute every query template once over `[start, end]` and bucket
    /// the datapoints into per-second utilisation series.
    ///
    /// Transient backend failures retry on the metrics backoff policy;
    /// validation errors surface immediately.
    pub async fn query_current_utilisation(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<UtilisationSeries> {
        let mut series = UtilisationSeries::default();

        for (operation, query) in &self.templates {
            debug!(
                stream = %self.stream_name,
                metric = %query.metric_name,
                "Requesting utilisation data"
            );

            let backend = &self.backend;
            let datapoints = (|| async move {
                backend.get_metric_statistics(query, start, end).await
            })
            .retry(metrics_policy())
            .when(|e| e.is_retryable())
            .await?;

            for point in datapoints {
                let Some(metric) = StreamMetric::from_unit(&point.unit) else {
                    warn!(
                        stream = %self.stream_name,
                        unit = %point.unit,
                        "Dropping datapoint with unrecognised unit"
                    );
                    continue;
                };
                let rate = point.sum / METRIC_PERIOD_SECS as f64;
                series.add_sample(*operation, metric, point.timestamp, rate);
            }
        }

        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::memory::InMemoryStreamService;
    use crate::control::traits::MetricDatapoint;
    use chrono::TimeZone;

    fn manager_with(
        svc: &Arc<InMemoryStreamService>,
        tracked: Vec<OperationType>,
    ) -> MetricsManager {
        MetricsManager::new(
            "orders",
            tracked,
            svc.clone(),
            ShardControl::new(svc.clone()),
        )
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn point(minute: u32, sum: f64, unit: &str) -> MetricDatapoint {
        MetricDatapoint {
            timestamp: at(minute),
            sum,
            unit: unit.to_string(),
        }
    }

    #[tokio::test]
    async fn test_capacity_tracks_open_shards() {
        let svc = Arc::new(InMemoryStreamService::new());
        svc.create_stream("orders", 4);
        let mut manager = manager_with(&svc, OperationType::ALL.to_vec());

        assert!(manager.max_capacity(OperationType::Put).is_none());
        let shards = manager.load_max_capacity().await.unwrap();
        assert_eq!(shards, 4);

        let put = manager.max_capacity(OperationType::Put).unwrap();
        assert_eq!(put.bytes_per_sec, 4 * 1_048_576);
        let get = manager.max_capacity(OperationType::Get).unwrap();
        assert_eq!(get.records_per_sec, 8_000);
    }

    #[tokio::test]
    async fn test_put_series_sum_single_and_batched_metrics() {
        let svc = Arc::new(InMemoryStreamService::new());
        svc.create_stream("orders", 1);

        // Single and batched puts land on the same timestamp and must add.
        svc.push_datapoints("PutRecord.Bytes", vec![point(0, 600.0, "BYTES")]);
        svc.push_datapoints("PutRecords.Bytes", vec![point(0, 1200.0, "BYTES")]);
        svc.push_datapoints("PutRecord.Success", vec![point(0, 60.0, "COUNT")]);
        svc.push_datapoints("PutRecords.Records", vec![point(0, 120.0, "COUNT")]);

        let manager = manager_with(&svc, vec![OperationType::Put]);
        let series = manager
            .query_current_utilisation(at(0), at(5))
            .await
            .unwrap();

        let bytes = series
            .series(OperationType::Put, StreamMetric::Bytes)
            .unwrap();
        assert_eq!(bytes.len(), 1);
        assert!((bytes[&at(0)] - 30.0).abs() < 1e-9); // (600+1200)/60

        let records = series
            .series(OperationType::Put, StreamMetric::Records)
            .unwrap();
        assert!((records[&at(0)] - 3.0).abs() < 1e-9); // (60+120)/60
    }

    #[tokio::test]
    async fn test_window_bounds_filter_datapoints() {
        let svc = Arc::new(InMemoryStreamService::new());
        svc.create_stream("orders", 1);
        svc.push_datapoints(
            "GetRecords.Bytes",
            vec![point(0, 60.0, "BYTES"), point(30, 120.0, "BYTES")],
        );

        let manager = manager_with(&svc, vec![OperationType::Get]);
        let series = manager
            .query_current_utilisation(at(20), at(40))
            .await
            .unwrap();

        let bytes = series
            .series(OperationType::Get, StreamMetric::Bytes)
            .unwrap();
        assert_eq!(bytes.len(), 1);
        assert!(bytes.contains_key(&at(30)));
    }

    #[tokio::test]
    async fn test_transient_backend_errors_are_retried() {
        let svc = Arc::new(InMemoryStreamService::new());
        svc.create_stream("orders", 1);
        svc.push_datapoints("GetRecords.Bytes", vec![point(0, 60.0, "BYTES")]);
        svc.inject_error(
            "metrics",
            crate::error::ScalingError::Backend("transient".into()),
        );

        let manager = manager_with(&svc, vec![OperationType::Get]);
        let series = manager
            .query_current_utilisation(at(0), at(5))
            .await
            .unwrap();
        assert!(series
            .series(OperationType::Get, StreamMetric::Bytes)
            .is_some());
    }

    #[tokio::test]
    async fn test_validation_errors_surface_immediately() {
        let svc = Arc::new(InMemoryStreamService::new());
        svc.create_stream("orders", 1);
        svc.inject_error(
            "metrics",
            crate::error::ScalingError::InvalidArgument("bad period".into()),
        );

        let manager = manager_with(&svc, vec![OperationType::Get]);
        let err = manager.query_current_utilisation(at(0), at(5)).await;
        assert!(matches!(
            err,
            Err(crate::error::ScalingError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_unrecognised_units_are_dropped() {
        let svc = Arc::new(InMemoryStreamService::new());
        svc.create_stream("orders", 1);
        svc.push_datapoints("GetRecords.Bytes", vec![point(0, 60.0, "FURLONGS")]);

        let manager = manager_with(&svc, vec![OperationType::Get]);
        let series = manager
            .query_current_utilisation(at(0), at(5))
            .await
            .unwrap();
        assert!(series
            .series(OperationType::Get, StreamMetric::Bytes)
            .is_none());
    }
}

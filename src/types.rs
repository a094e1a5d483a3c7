//! Shared vocabulary types for scaling and monitoring.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{
    GET_BYTES_PER_SHARD, GET_RECORDS_PER_SHARD, PUT_BYTES_PER_SHARD, PUT_RECORDS_PER_SHARD,
};

/// Direction of a scaling action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScaleDirection {
    Up,
    Down,
    None,
}

impl fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleDirection::Up => write!(f, "UP"),
            ScaleDirection::Down => write!(f, "DOWN"),
            ScaleDirection::None => write!(f, "NONE"),
        }
    }
}

/// How a scale request expresses its magnitude.
///
/// Percentages carry dual semantics depending on their value and direction;
/// see [`crate::scaler::new_shard_count`] for the full interpretation table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleBy {
    /// An absolute number of shards to add, remove, or resize to.
    Count(u32),
    /// A percentage of the current open shard count.
    Pct(f64),
}

/// The operation classes a stream can be scaled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Put,
    Get,
}

impl OperationType {
    /// Both operation classes, in vote order.
    pub const ALL: [OperationType; 2] = [OperationType::Put, OperationType::Get];

    /// Per-shard capacity of this operation class.
    pub fn max_capacity(&self) -> StreamCapacity {
        match self {
            OperationType::Put => StreamCapacity {
                bytes_per_sec: PUT_BYTES_PER_SHARD,
                records_per_sec: PUT_RECORDS_PER_SHARD,
            },
            OperationType::Get => StreamCapacity {
                bytes_per_sec: GET_BYTES_PER_SHARD,
                records_per_sec: GET_RECORDS_PER_SHARD,
            },
        }
    }

    /// The metric names that together describe this operation's load. The
    /// service splits single-record and batched puts across separate
    /// metrics, so PUT load is the sum of four series.
    pub fn metrics_to_fetch(&self) -> &'static [&'static str] {
        match self {
            OperationType::Put => &[
                "PutRecord.Bytes",
                "PutRecords.Bytes",
                "PutRecord.Success",
                "PutRecords.Records",
            ],
            OperationType::Get => &["GetRecords.Bytes", "GetRecords.Success"],
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Put => write!(f, "PUT"),
            OperationType::Get => write!(f, "GET"),
        }
    }
}

/// The two capacity dimensions an operation is measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamMetric {
    Bytes,
    Records,
}

impl StreamMetric {
    pub const ALL: [StreamMetric; 2] = [StreamMetric::Bytes, StreamMetric::Records];

    /// Map a datapoint's declared unit onto the dimension it measures.
    pub fn from_unit(unit: &str) -> Option<StreamMetric> {
        match unit {
            "BYTES" => Some(StreamMetric::Bytes),
            "COUNT" => Some(StreamMetric::Records),
            _ => None,
        }
    }
}

impl fmt::Display for StreamMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamMetric::Bytes => write!(f, "Bytes"),
            StreamMetric::Records => write!(f, "Records"),
        }
    }
}

/// Maximum sustained throughput of a stream for one operation class,
/// derived as open-shard count times the per-shard caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCapacity {
    pub bytes_per_sec: u64,
    pub records_per_sec: u64,
}

impl StreamCapacity {
    /// Capacity of `shards` open shards for the given operation.
    pub fn for_shards(operation: OperationType, shards: u64) -> StreamCapacity {
        let per_shard = operation.max_capacity();
        StreamCapacity {
            bytes_per_sec: per_shard.bytes_per_sec * shards,
            records_per_sec: per_shard.records_per_sec * shards,
        }
    }

    /// The cap along one dimension, as a float for utilisation math.
    pub fn limit(&self, metric: StreamMetric) -> f64 {
        match metric {
            StreamMetric::Bytes => self.bytes_per_sec as f64,
            StreamMetric::Records => self.records_per_sec as f64,
        }
    }
}

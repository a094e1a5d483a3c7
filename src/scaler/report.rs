//! Scaling operation reports.
//!
//! Every terminal scaling decision - successful, deferred, capped, or
//! errored - produces exactly one [`ScalingReport`]. The report renders to
//! a human-readable shard table for logs and CLI-style output, and to
//! structured JSON for notification payloads.

use std::fmt;

use serde::Serialize;

use crate::error::Result;
use crate::shard::OpenShardSet;
use crate::types::ScaleDirection;

/// How a scaling operation concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompletionStatus {
    /// A report was requested without any scaling action.
    ReportOnly,
    /// The computed target equalled the current shard count.
    NoActionRequired,
    /// The stream was already at its configured minimum before any
    /// mutation was made.
    AlreadyAtMinimum,
    /// The stream was already at its configured maximum before any
    /// mutation was made.
    AlreadyAtMaximum,
    /// The operation failed after mutations may have been applied.
    Error,
    /// The operation completed.
    Ok,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CompletionStatus::ReportOnly => "ReportOnly",
            CompletionStatus::NoActionRequired => "NoActionRequired",
            CompletionStatus::AlreadyAtMinimum => "AlreadyAtMinimum",
            CompletionStatus::AlreadyAtMaximum => "AlreadyAtMaximum",
            CompletionStatus::Error => "Error",
            CompletionStatus::Ok => "Ok",
        };
        write!(f, "{}", label)
    }
}

/// The outcome of one scaling operation.
#[derive(Debug, Clone, Serialize)]
pub struct ScalingReport {
    pub end_status: CompletionStatus,
    pub direction: ScaleDirection,
    /// Provider mutations issued (splits, merges, or one atomic resize).
    pub operations_made: u32,
    /// The stream's open shards after the final mutation.
    pub layout: OpenShardSet,
}

impl ScalingReport {
    pub fn new(
        end_status: CompletionStatus,
        direction: ScaleDirection,
        operations_made: u32,
        layout: OpenShardSet,
    ) -> ScalingReport {
        ScalingReport {
            end_status,
            direction,
            operations_made,
            layout,
        }
    }

    /// A report that carries only the current layout.
    pub fn report_only(layout: OpenShardSet) -> ScalingReport {
        ScalingReport::new(
            CompletionStatus::ReportOnly,
            ScaleDirection::None,
            0,
            layout,
        )
    }

    /// Structured rendering for notification targets that accept JSON.
    pub fn as_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for ScalingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Scaling Direction: {}", self.direction)?;
        writeln!(
            f,
            "End Status: {}, Operations Made: {}",
            self.end_status, self.operations_made
        )?;
        for (i, shard) in self.layout.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", shard)?;
        }
        Ok(())
    }
}

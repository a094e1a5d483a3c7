//! Crate-level error types.
//!
//! The crate uses a single error enum, [`ScalingError`], for everything that
//! can actually fail: control-plane calls, metric queries, configuration
//! loading, and post-mutation shard resolution.
//!
//! Outcomes that are *decisions* rather than failures - a scale attempt that
//! found the stream already at a cap, or a cycle that needed no action - are
//! not errors. They are reported as
//! [`CompletionStatus`](crate::scaler::CompletionStatus) on the
//! [`ScalingReport`](crate::scaler::ScalingReport), so callers never branch
//! on error types to discover a routine no-op.
//!
//! [`ScalingError::is_retryable`] classifies errors for the retry loop in
//! [`crate::retry`]: throttling and in-flight-mutation conditions are
//! retried, argument and configuration errors surface immediately.

use std::result;

use thiserror::Error;

pub type Result<T> = result::Result<T, ScalingError>;

/// Errors produced while scaling or monitoring a stream.
#[derive(Debug, Error)]
pub enum ScalingError {
    /// A configuration document failed validation. Fatal at load time.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A scale-down was requested against a stream with a single open shard.
    #[error("stream {0} cannot scale down: already at one shard")]
    AlreadyOneShard(String),

    /// The service throttled the call ("limit exceeded"). Retried with
    /// exponential backoff.
    #[error("throttled by stream service: {0}")]
    Throttled(String),

    /// The stream has a mutation in flight ("resource in use"). Retried
    /// after a fixed delay.
    #[error("resource in use: {0}")]
    ResourceInUse(String),

    /// The service rejected the call outright: invalid argument, invalid
    /// parameter combination, or missing required parameter. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested stream or shard does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A post-mutation listing failed to surface the shard(s) the mutation
    /// must have created. Fatal for the action in progress.
    #[error("unable to resolve shards created by {operation} on stream {stream}")]
    ResolutionFailure { stream: String, operation: String },

    /// A retryable condition persisted past the attempt budget.
    #[error("operation failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Configuration could not be fetched or parsed at process start.
    #[error("fatal startup error: {0}")]
    FatalStartup(String),

    /// Opaque failure from an injected backend (control plane, metrics,
    /// notification). Treated as transient.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScalingError {
    /// Whether the retry loop should try this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScalingError::Throttled(_) | ScalingError::ResourceInUse(_) | ScalingError::Backend(_)
        )
    }

    /// Whether this error represents service throttling, which backs off
    /// exponentially rather than waiting the fixed in-use delay.
    pub fn is_throttle(&self) -> bool {
        matches!(self, ScalingError::Throttled(_))
    }
}

impl From<serde_json::Error> for ScalingError {
    fn from(e: serde_json::Error) -> Self {
        ScalingError::InvalidConfiguration(e.to_string())
    }
}

impl From<object_store::Error> for ScalingError {
    fn from(e: object_store::Error) -> Self {
        ScalingError::FatalStartup(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ScalingError::Throttled("slow down".into()).is_retryable());
        assert!(ScalingError::ResourceInUse("mutating".into()).is_retryable());
        assert!(ScalingError::Backend("transient".into()).is_retryable());

        assert!(!ScalingError::InvalidArgument("bad hash".into()).is_retryable());
        assert!(!ScalingError::InvalidConfiguration("no stream".into()).is_retryable());
        assert!(!ScalingError::NotFound("ghost".into()).is_retryable());
        assert!(!ScalingError::AlreadyOneShard("tiny".into()).is_retryable());
        assert!(!ScalingError::ResolutionFailure {
            stream: "s".into(),
            operation: "split".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_throttle_classification() {
        assert!(ScalingError::Throttled("x".into()).is_throttle());
        assert!(!ScalingError::ResourceInUse("x".into()).is_throttle());
    }

    #[test]
    fn test_display_names_the_stream() {
        let e = ScalingError::AlreadyOneShard("orders".into());
        assert!(e.to_string().contains("orders"));

        let e = ScalingError::ResolutionFailure {
            stream: "orders".into(),
            operation: "merge".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("orders"));
        assert!(msg.contains("merge"));
    }

    #[test]
    fn test_serde_json_error_maps_to_invalid_configuration() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let e: ScalingError = parse_err.into();
        assert!(matches!(e, ScalingError::InvalidConfiguration(_)));
    }
}

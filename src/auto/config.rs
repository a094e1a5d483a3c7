//! Autoscaling configuration: per-stream policies and the document loader.
//!
//! A configuration document is a JSON array of [`StreamPolicy`] objects.
//! Unknown fields are ignored; defaults are applied on deserialization and
//! every policy is validated before the controller will accept it.
//!
//! # Example document
//!
//! ```json
//! [
//!   {
//!     "streamName": "orders",
//!     "region": "eu-west-1",
//!     "scaleOnOperations": ["PUT"],
//!     "minShards": 2,
//!     "maxShards": 64,
//!     "scaleUp":   { "thresholdPct": 75, "afterMins": 5,  "coolOffMins": 10, "scalePct": 200 },
//!     "scaleDown": { "thresholdPct": 25, "afterMins": 60, "coolOffMins": 60, "scaleCount": 2 }
//!   }
//! ]
//! ```
//!
//! # Sources
//!
//! [`ConfigLoader::load_from_url`] resolves `s3://bucket/key` handles
//! through `object_store` and absolute filesystem paths (optionally
//! `file://`-prefixed) through the local filesystem. Other schemes are the
//! host's concern: implement [`ConfigFetcher`] and use
//! [`ConfigLoader::load_with_fetcher`].

use std::time::Duration;

use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::{DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_REFRESH_SHARDS_AFTER_MINS};
use crate::error::{Result, ScalingError};
use crate::types::OperationType;

/// Scaling behavior for one direction of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPolicy {
    /// Utilisation percentage that marks a sample as high (scale-up) or
    /// low (scale-down).
    pub threshold_pct: f64,

    /// Number of one-minute samples past the threshold required before
    /// this direction votes.
    pub after_mins: u32,

    /// Minimum minutes between successful actions in this direction.
    #[serde(default)]
    pub cool_off_mins: u32,

    /// Scale by an absolute shard count. Takes precedence over
    /// `scale_pct` when both are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_count: Option<u32>,

    /// Scale by a percentage of the current shard count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_pct: Option<f64>,

    /// Target to notify when an action in this direction completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_target: Option<String>,
}

impl ScalingPolicy {
    pub fn cool_off(&self) -> Duration {
        Duration::from_secs(self.cool_off_mins as u64 * 60)
    }

    fn validate(&self, direction: &str) -> Result<()> {
        if !(self.threshold_pct > 0.0 && self.threshold_pct <= 100.0) {
            return Err(ScalingError::InvalidConfiguration(format!(
                "{}.thresholdPct must be in (0, 100]",
                direction
            )));
        }
        if self.after_mins == 0 {
            return Err(ScalingError::InvalidConfiguration(format!(
                "{}.afterMins must be at least 1",
                direction
            )));
        }
        if self.scale_count.is_none() && self.scale_pct.is_none() {
            return Err(ScalingError::InvalidConfiguration(format!(
                "{} requires one of scaleCount or scalePct",
                direction
            )));
        }
        if self.scale_count == Some(0) {
            return Err(ScalingError::InvalidConfiguration(format!(
                "{}.scaleCount must be positive",
                direction
            )));
        }
        Ok(())
    }
}

fn default_operations() -> Vec<OperationType> {
    OperationType::ALL.to_vec()
}

fn default_refresh_mins() -> u32 {
    DEFAULT_REFRESH_SHARDS_AFTER_MINS as u32
}

fn default_check_interval() -> u32 {
    DEFAULT_CHECK_INTERVAL_SECS as u32
}

/// Autoscaling policy for one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPolicy {
    pub stream_name: String,

    /// Region the stream and its metrics live in. Used by the host's
    /// backend provider to construct clients.
    #[serde(default)]
    pub region: Option<String>,

    /// Which operation classes drive scaling votes.
    #[serde(default = "default_operations")]
    pub scale_on_operations: Vec<OperationType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_shards: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_shards: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_up: Option<ScalingPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down: Option<ScalingPolicy>,

    /// Minutes between unconditional capacity refreshes, which absorb
    /// shard count changes made outside the autoscaler.
    #[serde(default = "default_refresh_mins")]
    pub refresh_shards_after_mins: u32,

    /// Seconds between evaluation cycles.
    #[serde(default = "default_check_interval")]
    pub check_interval_sec: u32,
}

impl StreamPolicy {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_sec as u64)
    }

    pub fn refresh_shards_after(&self) -> Duration {
        Duration::from_secs(self.refresh_shards_after_mins as u64 * 60)
    }

    /// The sampling window: wide enough to cover the slower direction.
    pub fn window_mins(&self) -> u32 {
        let up = self.scale_up.as_ref().map(|p| p.after_mins).unwrap_or(0);
        let down = self.scale_down.as_ref().map(|p| p.after_mins).unwrap_or(0);
        up.max(down)
    }

    /// Validate the policy. Configuration documents pin the percentage
    /// interpretation per direction: a scale-up percentage must be a factor
    /// (above 100), a scale-down percentage a delta (below 100). The
    /// programmatic scaling path deliberately accepts the wider forms.
    pub fn validate(&self) -> Result<()> {
        if self.stream_name.trim().is_empty() {
            return Err(ScalingError::InvalidConfiguration(
                "streamName must not be empty".to_string(),
            ));
        }
        if self.scale_up.is_none() && self.scale_down.is_none() {
            return Err(ScalingError::InvalidConfiguration(format!(
                "stream {} configures neither scaleUp nor scaleDown",
                self.stream_name
            )));
        }
        if self.scale_on_operations.is_empty() {
            return Err(ScalingError::InvalidConfiguration(format!(
                "stream {} has an empty scaleOnOperations list",
                self.stream_name
            )));
        }

        if let Some(up) = &self.scale_up {
            up.validate("scaleUp")?;
            if let Some(pct) = up.scale_pct {
                if pct <= 100.0 {
                    return Err(ScalingError::InvalidConfiguration(format!(
                        "stream {}: scaleUp.scalePct must be above 100 (a target \
                         factor in percent of current)",
                        self.stream_name
                    )));
                }
            }
        }
        if let Some(down) = &self.scale_down {
            down.validate("scaleDown")?;
            if let Some(pct) = down.scale_pct {
                if pct >= 100.0 {
                    return Err(ScalingError::InvalidConfiguration(format!(
                        "stream {}: scaleDown.scalePct must be below 100",
                        self.stream_name
                    )));
                }
            }
        }

        if let (Some(min), Some(max)) = (self.min_shards, self.max_shards) {
            if min > max {
                return Err(ScalingError::InvalidConfiguration(format!(
                    "stream {}: minShards {} exceeds maxShards {}",
                    self.stream_name, min, max
                )));
            }
        }
        Ok(())
    }
}

/// Fetches raw configuration bytes for schemes the crate does not resolve
/// itself (http/https, resource bundles, secret stores).
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Loads, defaults, and validates configuration documents.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a configuration document from an `s3://bucket/key` handle or a
    /// filesystem path.
    pub async fn load_from_url(url: &str) -> Result<Vec<StreamPolicy>> {
        let bytes = if let Some(remainder) = url.strip_prefix("s3://") {
            let (bucket, key) = remainder.split_once('/').ok_or_else(|| {
                ScalingError::FatalStartup(format!("s3 configuration url {} has no key", url))
            })?;
            let store = object_store::aws::AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()?;
            let payload = store.get(&ObjectPath::from(key)).await?;
            let data = payload.bytes().await?;
            info!(url, bytes = data.len(), "Loaded configuration from object store");
            data.to_vec()
        } else if url.starts_with("http://") || url.starts_with("https://") {
            return Err(ScalingError::FatalStartup(format!(
                "http(s) configuration sources require a ConfigFetcher: {}",
                url
            )));
        } else {
            let path = url.strip_prefix("file://").unwrap_or(url);
            let data = tokio::fs::read(path).await.map_err(|e| {
                ScalingError::FatalStartup(format!("unable to read configuration {}: {}", url, e))
            })?;
            info!(url, bytes = data.len(), "Loaded configuration from filesystem");
            data
        };

        Self::parse(&bytes)
    }

    /// Load a configuration document through a host-provided fetcher.
    pub async fn load_with_fetcher(
        url: &str,
        fetcher: &dyn ConfigFetcher,
    ) -> Result<Vec<StreamPolicy>> {
        let bytes = fetcher.fetch(url).await?;
        Self::parse(&bytes)
    }

    /// Parse and validate a raw configuration document.
    pub fn parse(bytes: &[u8]) -> Result<Vec<StreamPolicy>> {
        let policies: Vec<StreamPolicy> = serde_json::from_slice(bytes)?;
        if policies.is_empty() {
            return Err(ScalingError::InvalidConfiguration(
                "configuration document contains no stream policies".to_string(),
            ));
        }
        for policy in &policies {
            policy.validate()?;
        }
        Ok(policies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"[{
            "streamName": "orders",
            "scaleUp": { "thresholdPct": 75, "afterMins": 5, "scalePct": 200 },
            "scaleDown": { "thresholdPct": 25, "afterMins": 60, "scaleCount": 1 }
        }]"#
    }

    #[test]
    fn test_parse_applies_defaults() {
        let policies = ConfigLoader::parse(minimal_json().as_bytes()).unwrap();
        assert_eq!(policies.len(), 1);
        let p = &policies[0];
        assert_eq!(p.scale_on_operations, OperationType::ALL.to_vec());
        assert_eq!(p.check_interval_sec, 45);
        assert_eq!(p.refresh_shards_after_mins, 10);
        assert_eq!(p.scale_up.as_ref().unwrap().cool_off_mins, 0);
        assert_eq!(p.window_mins(), 60);
    }

    #[test]
    fn test_empty_stream_name_rejected() {
        let json = minimal_json().replace("orders", "  ");
        let err = ConfigLoader::parse(json.as_bytes()).unwrap_err();
        assert!(matches!(err, ScalingError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_scale_up_pct_must_be_factor_form() {
        let json = minimal_json().replace("\"scalePct\": 200", "\"scalePct\": 50");
        let err = ConfigLoader::parse(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("scaleUp.scalePct"));
    }

    #[test]
    fn test_scale_down_pct_must_be_delta_form() {
        let json = minimal_json().replace("\"scaleCount\": 1", "\"scalePct\": 150");
        let err = ConfigLoader::parse(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("scaleDown.scalePct"));
    }

    #[test]
    fn test_min_above_max_rejected() {
        let json = minimal_json().replace(
            "\"streamName\": \"orders\",",
            "\"streamName\": \"orders\", \"minShards\": 8, \"maxShards\": 4,",
        );
        let err = ConfigLoader::parse(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("minShards"));
    }

    #[test]
    fn test_direction_requires_a_magnitude() {
        let json = minimal_json().replace(", \"scaleCount\": 1", "");
        let err = ConfigLoader::parse(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("scaleCount or scalePct"));
    }

    #[test]
    fn test_at_least_one_direction_required() {
        let json = r#"[{ "streamName": "orders" }]"#;
        let err = ConfigLoader::parse(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("neither"));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = minimal_json().replace(
            "\"streamName\": \"orders\",",
            "\"streamName\": \"orders\", \"futureKnob\": true,",
        );
        assert!(ConfigLoader::parse(json.as_bytes()).is_ok());
    }

    #[test]
    fn test_empty_document_rejected() {
        let err = ConfigLoader::parse(b"[]").unwrap_err();
        assert!(matches!(err, ScalingError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_malformed_json_is_invalid_configuration() {
        let err = ConfigLoader::parse(b"{ not json").unwrap_err();
        assert!(matches!(err, ScalingError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_operations_subset_parses() {
        let json = minimal_json().replace(
            "\"streamName\": \"orders\",",
            "\"streamName\": \"orders\", \"scaleOnOperations\": [\"GET\"],",
        );
        let policies = ConfigLoader::parse(json.as_bytes()).unwrap();
        assert_eq!(policies[0].scale_on_operations, vec![OperationType::Get]);
    }

    #[tokio::test]
    async fn test_load_from_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autoscaling.json");
        std::fs::write(&path, minimal_json()).unwrap();

        let policies = ConfigLoader::load_from_url(path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(policies[0].stream_name, "orders");

        let with_scheme = format!("file://{}", path.display());
        let policies = ConfigLoader::load_from_url(&with_scheme).await.unwrap();
        assert_eq!(policies[0].stream_name, "orders");
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal_startup() {
        let err = ConfigLoader::load_from_url("/nonexistent/autoscaling.json")
            .await
            .unwrap_err();
        assert!(matches!(err, ScalingError::FatalStartup(_)));
    }

    #[tokio::test]
    async fn test_http_requires_fetcher() {
        let err = ConfigLoader::load_from_url("https://config.example/doc.json")
            .await
            .unwrap_err();
        assert!(matches!(err, ScalingError::FatalStartup(_)));
    }

    #[tokio::test]
    async fn test_load_with_fetcher() {
        struct Fixed;
        #[async_trait]
        impl ConfigFetcher for Fixed {
            async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
                Ok(minimal_json().as_bytes().to_vec())
            }
        }

        let policies = ConfigLoader::load_with_fetcher("https://x/doc.json", &Fixed)
            .await
            .unwrap();
        assert_eq!(policies[0].stream_name, "orders");
    }
}

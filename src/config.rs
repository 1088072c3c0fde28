//! Tuning and sizing configuration.
//!
//! Both components can be driven entirely by explicit arguments; these
//! structures exist so an orchestrating layer can keep buffer sizes and
//! timeouts in a YAML file next to the rest of its settings.
//!
//! ```rust
//! use packetflow::PipelineConfig;
//!
//! let config = PipelineConfig::from_yaml_str(
//!     "cache:\n  buffer_bytes: 1048576\nqueue:\n  workers: 2\n",
//! )?;
//! assert_eq!(config.cache.buffer_bytes, 1 << 20);
//! assert_eq!(config.queue.workers, 2);
//! # Ok::<(), packetflow::PipelineError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{PipelineError, Result};

/// Hard upper bound on any cache arena or write queue, in bytes.
#[cfg(target_pointer_width = "64")]
pub const MAX_BUFFER_BYTES: usize = 4 << 30;

/// Hard upper bound on any cache arena or write queue, in bytes.
#[cfg(not(target_pointer_width = "64"))]
pub const MAX_BUFFER_BYTES: usize = 1 << 30;

/// Clamp a requested buffer size to [`MAX_BUFFER_BYTES`].
pub fn clamp_buffer_bytes(requested: usize) -> usize {
    requested.min(MAX_BUFFER_BYTES)
}

/// Read-ahead cache sizing and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Arena size used by `start_with_config` (0 keeps the cache inactive)
    pub buffer_bytes: usize,

    /// Consumer-side wait before re-signalling an unanswered request
    pub request_retry_ms: u64,

    /// Prefetcher wait for a request before checking occupancy
    pub query_timeout_ms: u64,

    /// Time budget for the initial synchronous fill
    pub prefill_budget_ms: u64,

    /// Occupancy fraction under which a refill burst starts
    pub low_water_ratio: f64,

    /// Maximum packets loaded per refill burst
    pub refill_burst: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            buffer_bytes: 0,
            request_retry_ms: 1,
            query_timeout_ms: 10,
            prefill_budget_ms: 5000,
            low_water_ratio: 0.25,
            refill_burst: 10,
        }
    }
}

impl CacheConfig {
    /// Check that all timeouts and thresholds are usable
    pub fn validate(&self) -> Result<()> {
        if self.request_retry_ms == 0 {
            return Err(PipelineError::invalid_configuration("request_retry_ms must be positive"));
        }
        if self.query_timeout_ms == 0 {
            return Err(PipelineError::invalid_configuration("query_timeout_ms must be positive"));
        }
        if self.prefill_budget_ms == 0 {
            return Err(PipelineError::invalid_configuration("prefill_budget_ms must be positive"));
        }
        if !(self.low_water_ratio > 0.0 && self.low_water_ratio <= 1.0) {
            return Err(PipelineError::invalid_configuration(format!(
                "low_water_ratio must be within (0, 1], got {}",
                self.low_water_ratio
            )));
        }
        if self.refill_burst == 0 {
            return Err(PipelineError::invalid_configuration("refill_burst must be positive"));
        }
        Ok(())
    }

    pub fn request_retry(&self) -> Duration {
        Duration::from_millis(self.request_retry_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn prefill_budget(&self) -> Duration {
        Duration::from_millis(self.prefill_budget_ms)
    }

    /// Resident byte count under which a refill burst is triggered
    pub fn low_water_bytes(&self, capacity: usize) -> usize {
        (capacity as f64 * self.low_water_ratio) as usize
    }
}

/// Write-back queue sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Pending byte cap (0 keeps the queue inactive)
    pub max_queue_bytes: usize,

    /// Drop packets instead of blocking producers when full
    pub allow_drop: bool,

    /// Number of worker threads draining the queue
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_queue_bytes: 0, allow_drop: false, workers: 1 }
    }
}

impl QueueConfig {
    /// Check the worker count
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::invalid_configuration("workers must be positive"));
        }
        Ok(())
    }
}

/// Combined settings for one packet stream and one output sink
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub cache: CacheConfig,
    pub queue: QueueConfig,
}

impl PipelineConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| PipelineError::config_parse("pipeline configuration", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::ConfigFile { path: path.to_path_buf(), source: e })?;
        debug!("Loaded pipeline configuration from {}", path.display());
        Self::from_yaml_str(&yaml)
    }

    /// Serialize back to YAML
    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml_ng::to_string(self)
            .map_err(|e| PipelineError::config_parse("pipeline configuration", e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.queue.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn valid_configs_survive_yaml(
            buffer_bytes in 0usize..(1 << 40),
            retry in 1u64..1000,
            query in 1u64..1000,
            prefill in 1u64..100_000,
            ratio_pct in 1u32..=100,
            burst in 1usize..64,
            queue_bytes in 0usize..(1 << 40),
            allow_drop in any::<bool>(),
            workers in 1usize..16
        ) {
            let config = PipelineConfig {
                cache: CacheConfig {
                    buffer_bytes,
                    request_retry_ms: retry,
                    query_timeout_ms: query,
                    prefill_budget_ms: prefill,
                    low_water_ratio: f64::from(ratio_pct) / 100.0,
                    refill_burst: burst,
                },
                queue: QueueConfig { max_queue_bytes: queue_bytes, allow_drop, workers },
            };
            let yaml = config.to_yaml_string().unwrap();
            let parsed = PipelineConfig::from_yaml_str(&yaml).unwrap();
            prop_assert_eq!(parsed, config);
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.cache.request_retry(), Duration::from_millis(1));
        assert_eq!(config.cache.query_timeout(), Duration::from_millis(10));
        assert_eq!(config.cache.prefill_budget(), Duration::from_secs(5));
        assert_eq!(config.cache.low_water_bytes(1000), 250);
        assert_eq!(config.queue.workers, 1);
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = PipelineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_retry = "cache:\n  request_retry_ms: 0\n";
        assert!(matches!(
            PipelineConfig::from_yaml_str(zero_retry),
            Err(PipelineError::InvalidConfiguration { .. })
        ));

        let bad_ratio = "cache:\n  low_water_ratio: 1.5\n";
        assert!(matches!(
            PipelineConfig::from_yaml_str(bad_ratio),
            Err(PipelineError::InvalidConfiguration { .. })
        ));

        let no_workers = "queue:\n  workers: 0\n";
        assert!(matches!(
            PipelineConfig::from_yaml_str(no_workers),
            Err(PipelineError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn unknown_fields_are_parse_errors() {
        let yaml = "cache:\n  buffer_size: 10\n";
        assert!(matches!(
            PipelineConfig::from_yaml_str(yaml),
            Err(PipelineError::ConfigParse { .. })
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = PipelineConfig::from_path("/nonexistent/packetflow.yaml").unwrap_err();
        match err {
            PipelineError::ConfigFile { path, .. } => {
                assert_eq!(path, std::path::PathBuf::from("/nonexistent/packetflow.yaml"));
            }
            other => panic!("Expected ConfigFile error, got {other:?}"),
        }
    }

    #[test]
    fn buffer_requests_are_clamped() {
        assert_eq!(clamp_buffer_bytes(10), 10);
        assert_eq!(clamp_buffer_bytes(usize::MAX), MAX_BUFFER_BYTES);
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Size and time window used by the batch collector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of items in a batch.
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
    /// Maximum time, in milliseconds, to wait for a batch to fill before releasing it.
    #[serde(default = "default_batch_max_fill_ms")]
    pub max_fill_ms: u64,
}

impl BatchConfig {
    pub const DEFAULT_MAX_SIZE: usize = 1000;

    pub const DEFAULT_MAX_FILL_MS: u64 = 1000;

    /// Creates a config from a maximum size and a maximum fill duration.
    ///
    /// Durations are truncated to whole milliseconds.
    pub fn new(max_size: usize, max_fill: Duration) -> Self {
        Self {
            max_size,
            max_fill_ms: u64::try_from(max_fill.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns the maximum fill time as a [`Duration`].
    pub fn max_fill(&self) -> Duration {
        Duration::from_millis(self.max_fill_ms)
    }

    /// Validates batch configuration settings.
    ///
    /// A zero fill time would make the collector timer fire continuously, so both fields must be
    /// non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_size",
                constraint: "must be greater than 0",
            });
        }

        if self.max_fill_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_fill_ms",
                constraint: "must be greater than 0",
            });
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
            max_fill_ms: default_batch_max_fill_ms(),
        }
    }
}

fn default_batch_max_size() -> usize {
    BatchConfig::DEFAULT_MAX_SIZE
}

fn default_batch_max_fill_ms() -> u64 {
    BatchConfig::DEFAULT_MAX_FILL_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: BatchConfig = serde_json::from_str(r#"{"max_size": 5}"#).unwrap();

        assert_eq!(config.max_size, 5);
        assert_eq!(config.max_fill_ms, BatchConfig::DEFAULT_MAX_FILL_MS);
    }

    #[test]
    fn zero_size_is_rejected() {
        let config = BatchConfig::new(0, Duration::from_secs(1));

        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue {
                field: "batch.max_size",
                constraint: "must be greater than 0",
            })
        );
    }

    #[test]
    fn zero_fill_time_is_rejected() {
        let config = BatchConfig::new(10, Duration::ZERO);

        assert!(config.validate().is_err());
    }

    #[test]
    fn new_truncates_to_milliseconds() {
        let config = BatchConfig::new(3, Duration::from_micros(2_500));

        assert_eq!(config.max_fill_ms, 2);
        assert_eq!(config.max_fill(), Duration::from_millis(2));
        assert!(config.validate().is_ok());
    }
}

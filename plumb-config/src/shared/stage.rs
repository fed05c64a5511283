use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{BatchConfig, ValidationError};

/// Worker layout for a concurrent or partitioned stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StageConfig {
    /// Number of workers pulling from the shared input.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Number of partitions for key-routed batch processing.
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl StageConfig {
    pub const DEFAULT_CONCURRENCY: usize = 1;

    pub const DEFAULT_PARTITIONS: usize = 1;

    /// Validates the worker counts and the nested batch configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.concurrency == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "concurrency",
                constraint: "must be greater than 0",
            });
        }

        if self.partitions == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "partitions",
                constraint: "must be greater than 0",
            });
        }

        self.batch.validate()
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            partitions: default_partitions(),
            batch: BatchConfig::default(),
        }
    }
}

impl Config for StageConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        StageConfig::validate(self)
    }
}

fn default_concurrency() -> usize {
    StageConfig::DEFAULT_CONCURRENCY
}

fn default_partitions() -> usize {
    StageConfig::DEFAULT_PARTITIONS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(StageConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = StageConfig {
            concurrency: 0,
            ..StageConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue {
                field: "concurrency",
                ..
            })
        ));
    }

    #[test]
    fn nested_batch_config_is_validated() {
        let config = StageConfig {
            batch: BatchConfig {
                max_size: 0,
                max_fill_ms: 10,
            },
            ..StageConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue {
                field: "batch.max_size",
                ..
            })
        ));
    }
}

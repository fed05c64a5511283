//! Configuration for plumb pipelines.
//!
//! [`shared`] holds the serde types consumed by stage constructors, [`load`] reads and validates
//! them from layered configuration files and `APP_`-prefixed environment variables.

pub mod environment;
pub mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, ConfigLoader, Layer, LoadConfigError, load_config};

//! Logging and metrics setup for binaries and tests built on plumb.

pub mod metrics;
pub mod tracing;

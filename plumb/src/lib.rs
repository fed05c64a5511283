//! Composable concurrent pipeline stages.
//!
//! Stages connect through bounded [`stream`]s, run user logic through the
//! [`processor::Processor`] trait and share one [`concurrency::cancel::CancelSignal`] per run.
//! Items that cannot reach the end of a stage are never dropped silently: they are handed back
//! through [`processor::Processor::on_undeliverable`] with a [`error::PlumbError`] saying why.

pub mod concurrency;
pub mod error;
mod macros;
pub mod metrics;
pub mod processor;
pub mod stages;
pub mod stream;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

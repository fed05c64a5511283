//! Pipeline stages.
//!
//! Every stage takes its input as a [`crate::stream::StreamRx`], spawns the tasks that drive
//! it and returns the receiving half of a stream it owns. A stage closes its output exactly
//! once, after its input closed and all of its workers finished. Stage constructors must be
//! called within a tokio runtime.

mod adapt;
mod batch;
mod collect;
mod merge;
mod partition;
mod process;
mod relay;
mod sink;
mod source;

pub use adapt::{buffer, delay, split};
pub use batch::{process_batch, process_batch_concurrently, process_batch_partitions_concurrently};
pub use collect::{CANCEL_GRACE_PERIOD, collect};
pub use merge::merge;
pub use partition::partition;
pub use process::{process, process_concurrently};
pub use relay::relay;
pub use sink::drain;
pub use source::emit;

use metrics::counter;
use plumb_config::shared::BatchConfig;
use tracing::error;

use crate::error::{ErrorKind, PlumbError};
use crate::metrics::{
    ERROR_KIND_LABEL, PLUMB_BATCHES_UNDELIVERABLE_TOTAL, PLUMB_ITEMS_UNDELIVERABLE_TOTAL,
    STAGE_LABEL,
};
use crate::plumb_error;
use crate::processor::Processor;

/// Error paired with items that could not be written because the downstream receiver is gone.
fn output_closed_error() -> PlumbError {
    plumb_error!(
        ErrorKind::OutputClosed,
        "Stage output stream was closed by its consumer"
    )
}

/// Hands an item to the processor's undeliverable callback and records it.
fn item_undeliverable<I, O, P>(stage: &'static str, processor: &P, item: I, error: PlumbError)
where
    P: Processor<I, O>,
{
    counter!(
        PLUMB_ITEMS_UNDELIVERABLE_TOTAL,
        STAGE_LABEL => stage,
        ERROR_KIND_LABEL => error.kind().as_str()
    )
    .increment(1);

    processor.on_undeliverable(item, error);
}

/// Hands a whole batch to the processor's undeliverable callback and records it.
fn batch_undeliverable<I, O, P>(stage: &'static str, processor: &P, batch: Vec<I>, error: PlumbError)
where
    P: Processor<Vec<I>, Vec<O>>,
{
    counter!(
        PLUMB_BATCHES_UNDELIVERABLE_TOTAL,
        STAGE_LABEL => stage,
        ERROR_KIND_LABEL => error.kind().as_str()
    )
    .increment(1);
    counter!(
        PLUMB_ITEMS_UNDELIVERABLE_TOTAL,
        STAGE_LABEL => stage,
        ERROR_KIND_LABEL => error.kind().as_str()
    )
    .increment(batch.len() as u64);

    processor.on_undeliverable(batch, error);
}

/// Panics on an invalid [`BatchConfig`].
fn validate_batch_config(stage: &'static str, config: &BatchConfig) {
    if let Err(err) = config.validate() {
        error!(stage, error = %err, "invalid batch configuration");
        panic!("invalid batch configuration for {stage}: {err}");
    }
}

/// Panics when a stage is asked to run with zero workers.
fn validate_worker_count(stage: &'static str, workers: usize) {
    if workers == 0 {
        error!(stage, "stage requires at least one worker");
        panic!("{stage} requires at least one worker");
    }
}

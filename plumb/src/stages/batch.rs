use std::sync::Arc;

use metrics::counter;
use plumb_config::shared::BatchConfig;
use tracing::{debug, warn};

use crate::concurrency::cancel::CancelSignal;
use crate::concurrency::pool::spawn_workers;
use crate::metrics::{PLUMB_ITEMS_PROCESSED_TOTAL, STAGE_LABEL};
use crate::processor::Processor;
use crate::stages::collect::Collector;
use crate::stages::partition::partition;
use crate::stages::{
    batch_undeliverable, output_closed_error, validate_batch_config, validate_worker_count,
};
use crate::stream::{StreamRx, StreamTx, channel};

const BATCH_STAGE: &str = "process_batch";
const PARTITIONED_BATCH_STAGE: &str = "process_batch_partitions";

/// Batches `input` according to `config` and runs every batch through `processor`.
///
/// Outputs of a successful batch are forwarded one by one, in order. A failed batch goes whole
/// to [`Processor::on_undeliverable`], and so does every batch released after `signal` fired.
///
/// # Panics
///
/// Panics if `config` is invalid.
pub fn process_batch<I, O, P>(
    signal: CancelSignal,
    config: &BatchConfig,
    processor: P,
    input: StreamRx<I>,
) -> StreamRx<O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
    P: Processor<Vec<I>, Vec<O>> + 'static,
{
    process_batch_concurrently(signal, 1, config, processor, input)
}

/// Runs `concurrency` independent batching workers over the same `input`.
///
/// Each worker buffers its own batches, so which items end up together is not deterministic.
/// The output closes once every worker finished.
///
/// # Panics
///
/// Panics if `concurrency` is zero or `config` is invalid.
pub fn process_batch_concurrently<I, O, P>(
    signal: CancelSignal,
    concurrency: usize,
    config: &BatchConfig,
    processor: P,
    input: StreamRx<I>,
) -> StreamRx<O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
    P: Processor<Vec<I>, Vec<O>> + 'static,
{
    validate_worker_count(BATCH_STAGE, concurrency);
    validate_batch_config(BATCH_STAGE, config);

    let config = config.clone();
    let processor = Arc::new(processor);
    let (tx, rx) = channel();

    spawn_workers(BATCH_STAGE, concurrency, tx, move |worker_id, output| {
        let collector = Collector::new(signal.clone(), &config, input.clone());
        run_batch_worker(
            BATCH_STAGE,
            worker_id,
            signal.clone(),
            collector,
            processor.clone(),
            output,
        )
    });

    rx
}

/// Routes items to `partitions` sub-streams with `partition_fn` and batches each sub-stream on
/// its own worker.
///
/// Items with the same key always end up in the same partition, and each partition keeps its
/// input order. Outputs of all partitions are merged. An item the router cannot hand to its
/// partition worker is reported to [`Processor::on_undeliverable`] as a single-item batch.
///
/// # Panics
///
/// Panics if `partitions` is zero or `config` is invalid. If `partition_fn` returns an index
/// outside `[0, partitions)` the stage fails: receiving from the returned stream panics.
pub fn process_batch_partitions_concurrently<I, O, P, F>(
    signal: CancelSignal,
    partitions: usize,
    config: &BatchConfig,
    partition_fn: F,
    processor: P,
    input: StreamRx<I>,
) -> StreamRx<O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
    P: Processor<Vec<I>, Vec<O>> + 'static,
    F: Fn(&I) -> usize + Send + 'static,
{
    validate_worker_count(PARTITIONED_BATCH_STAGE, partitions);
    validate_batch_config(PARTITIONED_BATCH_STAGE, config);

    let config = config.clone();
    let processor = Arc::new(processor);
    let rejected = processor.clone();
    let rejected_signal = signal.clone();
    let inputs = partition(partitions, partition_fn, input, move |item, err| {
        let err = rejected_signal.cause().map_or(err, Into::into);
        batch_undeliverable::<I, O, P>(PARTITIONED_BATCH_STAGE, rejected.as_ref(), vec![item], err);
    });
    let (tx, rx) = channel();

    spawn_workers(
        PARTITIONED_BATCH_STAGE,
        partitions,
        tx,
        move |worker_id, output| {
            let collector = Collector::new(signal.clone(), &config, inputs[worker_id].clone());
            run_batch_worker(
                PARTITIONED_BATCH_STAGE,
                worker_id,
                signal.clone(),
                collector,
                processor.clone(),
                output,
            )
        },
    );

    rx
}

async fn run_batch_worker<I, O, P>(
    stage: &'static str,
    worker_id: usize,
    signal: CancelSignal,
    mut collector: Collector<I>,
    processor: Arc<P>,
    output: StreamTx<O>,
) where
    I: Sync,
    P: Processor<Vec<I>, Vec<O>>,
{
    let mut batches = 0u64;

    while let Some((batch, reason)) = collector.next_batch().await {
        if let Some(cause) = signal.cause() {
            debug!(stage, worker_id, size = batch.len(), ?reason, %cause, "batch released after cancellation");
            batch_undeliverable(stage, processor.as_ref(), batch, cause.into());
            continue;
        }

        if output.is_closed() {
            batch_undeliverable(stage, processor.as_ref(), batch, output_closed_error());
            continue;
        }

        let results = match processor.process(&signal, &batch).await {
            Ok(results) => results,
            Err(err) => {
                batch_undeliverable(stage, processor.as_ref(), batch, err);
                continue;
            }
        };

        if output.is_closed() {
            batch_undeliverable(stage, processor.as_ref(), batch, output_closed_error());
            continue;
        }

        let total = results.len();
        let mut delivered = 0usize;
        for result in results {
            if output.send(result).await.is_err() {
                break;
            }
            delivered += 1;
        }

        if delivered == 0 && total > 0 {
            batch_undeliverable(stage, processor.as_ref(), batch, output_closed_error());
            continue;
        }

        // A partly forwarded batch counts as delivered.
        if delivered < total {
            warn!(
                stage,
                worker_id,
                delivered,
                dropped = total - delivered,
                "output closed while forwarding batch results"
            );
        }

        batches += 1;
        counter!(PLUMB_ITEMS_PROCESSED_TOTAL, STAGE_LABEL => stage).increment(batch.len() as u64);
    }

    debug!(stage, worker_id, batches, "batch worker input exhausted");
}

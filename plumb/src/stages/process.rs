use std::sync::Arc;

use metrics::counter;
use tracing::debug;

use crate::concurrency::cancel::CancelSignal;
use crate::concurrency::pool::spawn_workers;
use crate::metrics::{PLUMB_ITEMS_PROCESSED_TOTAL, STAGE_LABEL};
use crate::processor::Processor;
use crate::stages::{item_undeliverable, output_closed_error, validate_worker_count};
use crate::stream::{StreamRx, StreamTx, channel};

const PROCESS_STAGE: &str = "process";

/// Runs every item of `input` through `processor` on a single worker, preserving order.
///
/// Items read after `signal` fired are not processed: they go to
/// [`Processor::on_undeliverable`] with the cancellation cause, as do items whose processing
/// failed. The output closes once `input` is exhausted.
pub fn process<I, O, P>(signal: CancelSignal, processor: P, input: StreamRx<I>) -> StreamRx<O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
    P: Processor<I, O> + 'static,
{
    process_concurrently(signal, 1, processor, input)
}

/// Runs `concurrency` workers pulling from `input`, each doing what [`process`] does.
///
/// Output order is not related to input order. The output closes once every worker observed
/// the end of `input`.
///
/// # Panics
///
/// Panics if `concurrency` is zero.
pub fn process_concurrently<I, O, P>(
    signal: CancelSignal,
    concurrency: usize,
    processor: P,
    input: StreamRx<I>,
) -> StreamRx<O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
    P: Processor<I, O> + 'static,
{
    validate_worker_count(PROCESS_STAGE, concurrency);

    let processor = Arc::new(processor);
    let (tx, rx) = channel();

    spawn_workers(PROCESS_STAGE, concurrency, tx, move |worker_id, output| {
        run_item_worker(
            worker_id,
            signal.clone(),
            processor.clone(),
            input.clone(),
            output,
        )
    });

    rx
}

async fn run_item_worker<I, O, P>(
    worker_id: usize,
    signal: CancelSignal,
    processor: Arc<P>,
    input: StreamRx<I>,
    output: StreamTx<O>,
) where
    I: Sync,
    P: Processor<I, O>,
{
    let mut processed = 0u64;

    while let Some(item) = input.recv().await {
        if let Some(cause) = signal.cause() {
            item_undeliverable(PROCESS_STAGE, processor.as_ref(), item, cause.into());
            continue;
        }

        if output.is_closed() {
            item_undeliverable(PROCESS_STAGE, processor.as_ref(), item, output_closed_error());
            continue;
        }

        match processor.process(&signal, &item).await {
            Ok(result) => {
                if output.send(result).await.is_err() {
                    item_undeliverable(
                        PROCESS_STAGE,
                        processor.as_ref(),
                        item,
                        output_closed_error(),
                    );
                    continue;
                }

                processed += 1;
                counter!(PLUMB_ITEMS_PROCESSED_TOTAL, STAGE_LABEL => PROCESS_STAGE).increment(1);
            }
            Err(err) => {
                item_undeliverable(PROCESS_STAGE, processor.as_ref(), item, err);
            }
        }
    }

    debug!(worker_id, processed, "process worker input exhausted");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use super::*;
    use crate::concurrency::cancel::create_cancel_channel;
    use crate::error::ErrorKind;
    use crate::stages::emit;
    use crate::stream::channel_with_capacity;
    use crate::test_utils::processor::RecordingProcessor;

    #[tokio::test]
    async fn single_worker_preserves_order() {
        let processor = RecordingProcessor::new(|value: &u32| Ok(value * 10));

        let output = process(CancelSignal::never(), processor.clone(), emit(1..=5u32));

        assert_eq!(output.collect_vec().await, vec![10, 20, 30, 40, 50]);
        assert_eq!(processor.processed(), vec![1, 2, 3, 4, 5]);
        assert!(processor.undeliverable().is_empty());
    }

    #[tokio::test]
    async fn failures_are_routed_to_undeliverable() {
        let processor = RecordingProcessor::identity().fail_when(|value: &u32| value % 2 == 0);

        let output = process(CancelSignal::never(), processor.clone(), emit(vec![1, 2, 3, 4]));

        assert_eq!(output.collect_vec().await, vec![1, 3]);
        assert_eq!(
            processor.undeliverable(),
            vec![(2, ErrorKind::ProcessingFailed), (4, ErrorKind::ProcessingFailed)]
        );
    }

    #[tokio::test]
    async fn items_read_after_cancellation_are_not_processed() {
        let (handle, signal) = create_cancel_channel();
        let processor = RecordingProcessor::identity();
        let (tx, input) = channel_with_capacity(8);

        let output = process(signal, processor.clone(), input);

        tx.send(1u32).await.unwrap();
        assert_eq!(output.recv().await, Some(1));

        handle.cancel();
        tx.send(2).await.unwrap();
        tx.send(3).await.unwrap();
        drop(tx);

        assert_eq!(output.recv().await, None);
        assert_eq!(processor.processed(), vec![1]);
        assert_eq!(
            processor.undeliverable(),
            vec![(2, ErrorKind::Cancelled), (3, ErrorKind::Cancelled)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_workers_process_every_item_once() {
        let processor = RecordingProcessor::identity().with_delay(Duration::from_millis(2));

        let output = process_concurrently(CancelSignal::never(), 4, processor.clone(), emit(0..100u32));

        let outputs = output.collect_vec().await;
        assert_eq!(outputs.len(), 100);
        assert_eq!(outputs.into_iter().collect::<BTreeSet<_>>(), (0..100).collect());
        assert_eq!(processor.processed().len(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancellation_mid_stream_routes_each_item_once() {
        let (handle, signal) = create_cancel_channel();
        let processor = RecordingProcessor::identity().with_delay(Duration::from_millis(1));

        let output = process_concurrently(signal, 3, processor.clone(), emit(0..200u32));

        let mut forwarded = Vec::new();
        while let Some(item) = output.recv().await {
            forwarded.push(item);
            if forwarded.len() == 20 {
                handle.cancel();
            }
        }

        let undeliverable: Vec<u32> = processor
            .undeliverable()
            .into_iter()
            .map(|(item, kind)| {
                assert!(kind.is_cancellation());
                item
            })
            .collect();

        let forwarded_set: BTreeSet<u32> = forwarded.iter().copied().collect();
        let undeliverable_set: BTreeSet<u32> = undeliverable.iter().copied().collect();
        assert_eq!(forwarded_set.len(), forwarded.len());
        assert_eq!(undeliverable_set.len(), undeliverable.len());
        assert!(forwarded_set.is_disjoint(&undeliverable_set));
        assert_eq!(forwarded.len() + undeliverable.len(), 200);
    }

    #[tokio::test]
    async fn dropped_output_routes_items_as_output_closed() {
        let processor = RecordingProcessor::identity();

        let output = process(CancelSignal::never(), processor.clone(), emit(vec![1u32, 2, 3]));
        drop(output);

        for _ in 0..100 {
            if processor.undeliverable().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(
            processor
                .undeliverable()
                .iter()
                .all(|(_, kind)| *kind == ErrorKind::OutputClosed)
        );
        assert_eq!(processor.undeliverable().len(), 3);
    }

    #[test]
    #[should_panic(expected = "requires at least one worker")]
    fn zero_concurrency_panics() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();

        let _ = process_concurrently(
            CancelSignal::never(),
            0,
            RecordingProcessor::<u32>::identity(),
            emit(Vec::<u32>::new()),
        );
    }
}

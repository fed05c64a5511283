use tracing::{debug, error};

use crate::concurrency::pool::spawn_stage;
use crate::error::PlumbError;
use crate::stages::{output_closed_error, validate_worker_count};
use crate::stream::{StreamRx, StreamTx, channel};

/// Routes every item of `input` to one of `partitions` output streams.
///
/// `partition_fn` must return an index in `[0, partitions)` and should be a pure function of
/// the item, so that equal keys always land in the same partition. Each output keeps the
/// relative order of its items. An item whose partition output was already dropped is handed
/// to `on_undeliverable` with an [`crate::error::ErrorKind::OutputClosed`] error. All outputs
/// close once `input` is exhausted.
///
/// # Panics
///
/// Panics if `partitions` is zero. If `partition_fn` returns an index out of range the routing
/// task panics and every output is failed, so receiving from any of them panics too.
pub fn partition<T, F, U>(
    partitions: usize,
    partition_fn: F,
    input: StreamRx<T>,
    mut on_undeliverable: U,
) -> Vec<StreamRx<T>>
where
    T: Send + 'static,
    F: Fn(&T) -> usize + Send + 'static,
    U: FnMut(T, PlumbError) + Send + 'static,
{
    validate_worker_count("partition", partitions);

    let (outputs, receivers): (Vec<StreamTx<T>>, Vec<StreamRx<T>>) =
        (0..partitions).map(|_| channel()).unzip();

    spawn_stage("partition", outputs.clone(), async move {
        while let Some(item) = input.recv().await {
            let index = partition_fn(&item);
            let Some(output) = outputs.get(index) else {
                error!(index, partitions, "partition function returned an out of range index");
                panic!("partition index {index} is out of range for {partitions} partitions");
            };

            if let Err(item) = output.send(item).await {
                debug!(index, "partition output closed, item is undeliverable");
                on_undeliverable(item, output_closed_error());
            }
        }

        debug!(partitions, "partition input exhausted, closing outputs");
    });

    receivers
}

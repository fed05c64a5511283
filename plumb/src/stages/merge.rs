use tracing::{debug, warn};

use crate::concurrency::pool::spawn_stage;
use crate::stream::{StreamRx, channel};

/// Fans `inputs` into a single stream.
///
/// With no inputs the returned stream is already closed, and a single input is returned as is.
/// Otherwise every input is drained concurrently; items from one input keep their order but
/// there is no ordering across inputs. The output closes once every input closed.
pub fn merge<T>(inputs: Vec<StreamRx<T>>) -> StreamRx<T>
where
    T: Send + 'static,
{
    let count = inputs.len();
    let mut inputs = inputs.into_iter();

    let Some(first) = inputs.next() else {
        let (_, rx) = channel();
        return rx;
    };
    if count == 1 {
        return first;
    }

    let (tx, rx) = channel();
    for (index, input) in std::iter::once(first).chain(inputs).enumerate() {
        let tx = tx.clone();
        spawn_stage("merge", vec![tx.clone()], async move {
            while let Some(item) = input.recv().await {
                if tx.send(item).await.is_err() {
                    warn!(index, "merge output closed, stopping forwarder");
                    return;
                }
            }

            debug!(index, "merge input exhausted");
        });
    }

    debug!(inputs = count, "merging streams");

    rx
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::stages::emit;
    use crate::stream::channel_with_capacity;

    #[tokio::test]
    async fn no_inputs_yield_closed_stream() {
        let output = merge(Vec::<StreamRx<u32>>::new());

        assert_eq!(output.recv().await, None);
    }

    #[tokio::test]
    async fn single_input_is_returned_unchanged() {
        let (tx, input) = channel_with_capacity(4);
        let output = merge(vec![input]);

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);

        assert_eq!(output.collect_vec().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn output_is_union_of_inputs() {
        let output = merge(vec![emit(vec![1, 2, 3]), emit(vec![10, 20]), emit(vec![100])]);

        let mut items = output.collect_vec().await;
        items.sort_unstable();

        assert_eq!(items, vec![1, 2, 3, 10, 20, 100]);
    }

    #[tokio::test]
    async fn output_closes_only_after_every_input_closed() {
        let (slow_tx, slow) = channel_with_capacity(4);
        let output = merge(vec![emit(vec![1, 2]), slow]);

        let mut items = Vec::new();
        items.push(output.recv().await.unwrap());
        items.push(output.recv().await.unwrap());
        assert!(
            timeout(Duration::from_millis(20), output.recv())
                .await
                .is_err()
        );

        slow_tx.send(3).await.unwrap();
        drop(slow_tx);
        items.extend(output.collect_vec().await);

        items.sort_unstable();
        assert_eq!(items, vec![1, 2, 3]);
    }
}

//! Small stream adapters with no processor involved.

use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::concurrency::cancel::CancelSignal;
use crate::concurrency::pool::spawn_stage;
use crate::stream::{StreamRx, channel, channel_with_capacity};

/// Flattens a stream of batches back into a stream of items, keeping order.
pub fn split<T>(input: StreamRx<Vec<T>>) -> StreamRx<T>
where
    T: Send + 'static,
{
    let (tx, rx) = channel();

    spawn_stage("split", vec![tx.clone()], async move {
        while let Some(batch) = input.recv().await {
            for item in batch {
                if tx.send(item).await.is_err() {
                    debug!("split output closed, stopping");
                    return;
                }
            }
        }
    });

    rx
}

/// Relays `input` through a stream that buffers up to `size` items.
///
/// # Panics
///
/// Panics if `size` is zero.
pub fn buffer<T>(size: usize, input: StreamRx<T>) -> StreamRx<T>
where
    T: Send + 'static,
{
    let (tx, rx) = channel_with_capacity(size);

    spawn_stage("buffer", vec![tx.clone()], async move {
        while let Some(item) = input.recv().await {
            if tx.send(item).await.is_err() {
                debug!("buffer output closed, stopping");
                return;
            }
        }
    });

    rx
}

/// Forwards each item, then waits `duration` before reading the next one.
///
/// Once `signal` fires the waits are skipped and items flow through undelayed.
pub fn delay<T>(signal: CancelSignal, duration: Duration, input: StreamRx<T>) -> StreamRx<T>
where
    T: Send + 'static,
{
    let (tx, rx) = channel();

    spawn_stage("delay", vec![tx.clone()], async move {
        while let Some(item) = input.recv().await {
            if tx.send(item).await.is_err() {
                debug!("delay output closed, stopping");
                return;
            }

            tokio::select! {
                biased;

                _ = signal.cancelled() => {}
                _ = sleep(duration) => {}
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use tokio::time::{Instant, timeout};

    use super::*;
    use crate::concurrency::cancel::create_cancel_channel;
    use crate::stages::emit;

    #[tokio::test]
    async fn split_flattens_batches_in_order() {
        let output = split(emit(vec![vec![1, 2], vec![], vec![3]]));

        assert_eq!(output.collect_vec().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn buffer_accepts_items_without_a_reader() {
        let (tx, input) = channel();
        let output = buffer(3, input);

        for i in 0..3 {
            timeout(Duration::from_secs(1), tx.send(i))
                .await
                .expect("send blocked although the buffer has room")
                .unwrap();
        }
        drop(tx);

        assert_eq!(output.collect_vec().await, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_spaces_items() {
        let started = Instant::now();

        let output = delay(CancelSignal::never(), Duration::from_millis(50), emit(vec![1, 2, 3]));

        assert_eq!(output.collect_vec().await, vec![1, 2, 3]);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_skipped_after_cancellation() {
        let (handle, signal) = create_cancel_channel();
        handle.cancel();
        let started = Instant::now();

        let output = delay(signal, Duration::from_secs(60), emit(vec![1, 2, 3]));

        assert_eq!(output.collect_vec().await, vec![1, 2, 3]);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}

use tracing::{debug, info, warn};

use crate::concurrency::cancel::CancelSignal;
use crate::concurrency::pool::spawn_stage;
use crate::error::PlumbError;
use crate::stages::output_closed_error;
use crate::stream::{StreamRx, StreamTx, channel};

/// Forwards items from `input` until `signal` fires, then diverts the rest to `on_cancel`.
///
/// Waiting for the signal races both reading the next item and waiting for output capacity. An
/// item that was already read when the signal fires is diverted too, so every item is either
/// forwarded or passed to `on_cancel`, exactly once and in arrival order. If the output's
/// consumer goes away, the remaining items are diverted with an
/// [`crate::error::ErrorKind::OutputClosed`] error. The output closes once `input` is exhausted.
pub fn relay<T, F>(signal: CancelSignal, input: StreamRx<T>, mut on_cancel: F) -> StreamRx<T>
where
    T: Send + 'static,
    F: FnMut(T, PlumbError) + Send + 'static,
{
    let (tx, rx) = channel();

    spawn_stage("relay", vec![tx.clone()], async move {
        let diverted = match forward(&signal, &input, &tx, &mut on_cancel).await {
            RelayState::Forwarding => None,
            RelayState::Diverting(error) => {
                let mut diverted = 0usize;
                while let Some(item) = input.recv().await {
                    on_cancel(item, error.clone());
                    diverted += 1;
                }
                Some(diverted)
            }
        };

        debug!(?diverted, "relay input exhausted, closing output");
        drop(tx);
    });

    rx
}

/// Where the relay sends the items it reads.
enum RelayState {
    /// Items go to the output.
    Forwarding,
    /// Items go to the cancel callback with the stored error. Terminal.
    Diverting(PlumbError),
}

/// Forwards items until the input closes or the relay must start diverting.
///
/// Returns [`RelayState::Forwarding`] if the input was exhausted while forwarding.
async fn forward<T, F>(
    signal: &CancelSignal,
    input: &StreamRx<T>,
    output: &StreamTx<T>,
    on_cancel: &mut F,
) -> RelayState
where
    F: FnMut(T, PlumbError),
{
    loop {
        let item = tokio::select! {
            biased;

            cause = signal.cancelled() => {
                info!(%cause, "relay observed cancellation, diverting remaining items");
                return RelayState::Diverting(cause.into());
            }
            item = input.recv() => match item {
                Some(item) => item,
                None => return RelayState::Forwarding,
            },
        };

        let permit = tokio::select! {
            biased;

            cause = signal.cancelled() => {
                info!(%cause, "relay observed cancellation, diverting remaining items");
                let error: PlumbError = cause.into();
                on_cancel(item, error.clone());
                return RelayState::Diverting(error);
            }
            permit = output.reserve() => permit,
        };

        match permit {
            Some(permit) => permit.send(item),
            None => {
                warn!("relay output closed, diverting remaining items");
                let error = output_closed_error();
                on_cancel(item, error.clone());
                return RelayState::Diverting(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::concurrency::cancel::{CancelCause, create_cancel_channel};
    use crate::error::ErrorKind;
    use crate::stages::emit;
    use crate::stream::channel_with_capacity;

    type Diverted = Arc<Mutex<Vec<(u32, ErrorKind)>>>;

    fn recorder() -> (Diverted, impl FnMut(u32, PlumbError) + Send + 'static) {
        let diverted: Diverted = Arc::default();
        let sink = diverted.clone();
        (diverted, move |item: u32, error: PlumbError| {
            sink.lock().unwrap().push((item, error.kind()))
        })
    }

    #[tokio::test]
    async fn forwards_everything_without_cancellation() {
        let (diverted, on_cancel) = recorder();

        let output = relay(CancelSignal::never(), emit(vec![1, 2, 3]), on_cancel);

        assert_eq!(output.collect_vec().await, vec![1, 2, 3]);
        assert!(diverted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_diverts_remaining_items_in_order() {
        let (handle, signal) = create_cancel_channel();
        let (diverted, on_cancel) = recorder();
        let (tx, input) = channel_with_capacity(8);

        let output = relay(signal, input, on_cancel);

        tx.send(1).await.unwrap();
        assert_eq!(output.recv().await, Some(1));

        handle.cancel();
        for i in 2..=4 {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        assert_eq!(output.recv().await, None);
        assert_eq!(
            *diverted.lock().unwrap(),
            vec![
                (2, ErrorKind::Cancelled),
                (3, ErrorKind::Cancelled),
                (4, ErrorKind::Cancelled)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn item_blocked_on_output_capacity_is_diverted() {
        let (handle, signal) = create_cancel_channel();
        let (diverted, on_cancel) = recorder();
        let (tx, input) = channel_with_capacity(8);

        // Nobody reads the output, so the second item waits for capacity.
        let output = relay(signal, input, on_cancel);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.cancel_with(CancelCause::DeadlineExceeded);
        drop(tx);

        assert_eq!(output.collect_vec().await, vec![1]);
        assert_eq!(
            *diverted.lock().unwrap(),
            vec![(2, ErrorKind::DeadlineExceeded)]
        );
    }

    #[tokio::test]
    async fn closed_output_diverts_with_output_closed() {
        let (diverted, on_cancel) = recorder();

        let output = relay(CancelSignal::never(), emit(vec![1, 2, 3]), on_cancel);
        drop(output);

        // Give the relay time to observe the closed output and drain the input.
        for _ in 0..100 {
            if diverted.lock().unwrap().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(
            *diverted.lock().unwrap(),
            vec![
                (1, ErrorKind::OutputClosed),
                (2, ErrorKind::OutputClosed),
                (3, ErrorKind::OutputClosed)
            ]
        );
    }
}

use std::fmt;
use std::future::Future;

use crate::concurrency::cancel::CancelSignal;
use crate::error::{PlumbError, PlumbResult};
use crate::processor::Processor;

/// [`Processor`] backed by two closures. Built with [`processor_fn`].
#[derive(Clone)]
pub struct ProcessorFn<P, U> {
    process: P,
    on_undeliverable: U,
}

/// Builds a [`Processor`] from a processing closure and an undeliverable-item closure.
///
/// The processing closure receives owned copies of the signal and the item, so it can return
/// an `async move` block without borrowing from the stage.
///
/// ```
/// use plumb::concurrency::cancel::CancelSignal;
/// use plumb::error::{ErrorKind, PlumbError};
/// use plumb::plumb_error;
/// use plumb::processor::processor_fn;
///
/// let double = processor_fn(
///     |_signal: CancelSignal, value: u32| async move {
///         value
///             .checked_mul(2)
///             .ok_or_else(|| plumb_error!(ErrorKind::InvalidData, "Value overflowed"))
///     },
///     |value: u32, error: PlumbError| eprintln!("dropped {value}: {error}"),
/// );
/// # let _ = double;
/// ```
pub fn processor_fn<P, U>(process: P, on_undeliverable: U) -> ProcessorFn<P, U> {
    ProcessorFn {
        process,
        on_undeliverable,
    }
}

impl<I, O, P, U, Fut> Processor<I, O> for ProcessorFn<P, U>
where
    I: Clone,
    P: Fn(CancelSignal, I) -> Fut + Send + Sync,
    Fut: Future<Output = PlumbResult<O>> + Send,
    U: Fn(I, PlumbError) + Send + Sync,
{
    fn process(
        &self,
        signal: &CancelSignal,
        input: &I,
    ) -> impl Future<Output = PlumbResult<O>> + Send {
        (self.process)(signal.clone(), input.clone())
    }

    fn on_undeliverable(&self, input: I, error: PlumbError) {
        (self.on_undeliverable)(input, error)
    }
}

impl<P, U> fmt::Debug for ProcessorFn<P, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorFn").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::ErrorKind;
    use crate::{bail, plumb_error};

    #[tokio::test]
    async fn closures_back_both_callbacks() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let dropped_clone = dropped.clone();

        let processor = processor_fn(
            |_signal: CancelSignal, value: u32| async move {
                if value == 0 {
                    bail!(ErrorKind::InvalidData, "Zero is not allowed");
                }
                Ok(100 / value)
            },
            move |value: u32, error: PlumbError| {
                dropped_clone.lock().unwrap().push((value, error.kind()));
            },
        );

        let signal = CancelSignal::never();
        assert_eq!(processor.process(&signal, &4).await.unwrap(), 25);

        let err = processor.process(&signal, &0).await.unwrap_err();
        processor.on_undeliverable(0, err);
        processor.on_undeliverable(
            9,
            plumb_error!(ErrorKind::Cancelled, "Pipeline run was cancelled"),
        );

        assert_eq!(
            *dropped.lock().unwrap(),
            vec![(0, ErrorKind::InvalidData), (9, ErrorKind::Cancelled)]
        );
    }
}

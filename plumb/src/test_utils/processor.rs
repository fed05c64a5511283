use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;

use crate::bail;
use crate::concurrency::cancel::CancelSignal;
use crate::error::{ErrorKind, PlumbError, PlumbResult};
use crate::processor::Processor;

type MapFn<I, O> = Arc<dyn Fn(&I) -> PlumbResult<O> + Send + Sync>;
type FailFn<I> = Arc<dyn Fn(&I) -> bool + Send + Sync>;

struct Recorded<I> {
    processed: Vec<I>,
    undeliverable: Vec<(I, ErrorKind)>,
}

/// [`Processor`] that maps items with a closure and records every call.
///
/// Clones share the recorded state, so a test can keep a clone while a stage owns another.
pub struct RecordingProcessor<I, O = I> {
    map: MapFn<I, O>,
    fail: Option<FailFn<I>>,
    delay: Option<Duration>,
    recorded: Arc<Mutex<Recorded<I>>>,
}

impl<I, O> RecordingProcessor<I, O> {
    /// Creates a processor transforming items with `map`.
    pub fn new<F>(map: F) -> Self
    where
        F: Fn(&I) -> PlumbResult<O> + Send + Sync + 'static,
    {
        Self {
            map: Arc::new(map),
            fail: None,
            delay: None,
            recorded: Arc::new(Mutex::new(Recorded {
                processed: Vec::new(),
                undeliverable: Vec::new(),
            })),
        }
    }

    /// Fails with [`ErrorKind::ProcessingFailed`] for every item matching `predicate`.
    pub fn fail_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&I) -> bool + Send + Sync + 'static,
    {
        self.fail = Some(Arc::new(predicate));
        self
    }

    /// Sleeps for `delay` before handling each item, returning early with the cancellation
    /// cause if the signal fires.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the items processed successfully, in call order.
    pub fn processed(&self) -> Vec<I>
    where
        I: Clone,
    {
        self.lock().processed.clone()
    }

    /// Returns the items handed to `on_undeliverable` and their error kinds, in call order.
    pub fn undeliverable(&self) -> Vec<(I, ErrorKind)>
    where
        I: Clone,
    {
        self.lock().undeliverable.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded<I>> {
        self.recorded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<I> RecordingProcessor<I, I>
where
    I: Clone + 'static,
{
    /// Creates a processor returning a copy of every item.
    pub fn identity() -> Self {
        Self::new(|item: &I| Ok(item.clone()))
    }
}

impl<I, O> Processor<I, O> for RecordingProcessor<I, O>
where
    I: Clone + Send + Sync,
    O: Send,
{
    async fn process(&self, signal: &CancelSignal, input: &I) -> PlumbResult<O> {
        if let Some(delay) = self.delay {
            tokio::select! {
                biased;

                cause = signal.cancelled() => return Err(cause.into()),
                _ = sleep(delay) => {}
            }
        }

        if let Some(fail) = &self.fail
            && fail(input)
        {
            bail!(ErrorKind::ProcessingFailed, "Recording processor rejected item");
        }

        let output = (self.map)(input)?;
        self.lock().processed.push(input.clone());

        Ok(output)
    }

    fn on_undeliverable(&self, input: I, error: PlumbError) {
        self.lock().undeliverable.push((input, error.kind()));
    }
}

impl<I, O> Clone for RecordingProcessor<I, O> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
            fail: self.fail.clone(),
            delay: self.delay,
            recorded: self.recorded.clone(),
        }
    }
}

impl<I, O> fmt::Debug for RecordingProcessor<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingProcessor")
            .field("delay", &self.delay)
            .field("fails", &self.fail.is_some())
            .finish_non_exhaustive()
    }
}

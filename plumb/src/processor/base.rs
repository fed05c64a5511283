use std::future::Future;
use std::sync::Arc;

use crate::concurrency::cancel::CancelSignal;
use crate::error::{PlumbError, PlumbResult};

/// Business logic run by a stage for every item (or every batch) it reads.
///
/// Stages may call [`Processor::process`] from several workers at once, so implementations
/// must be [`Send`] and [`Sync`] and keep any mutable state behind synchronization.
///
/// [`Processor::process`] receives the run's [`CancelSignal`] and should return promptly with
/// an error built from [`CancelSignal::cause`] once it fires. Stages never abort an in-flight
/// call.
///
/// [`Processor::on_undeliverable`] is called exactly once for every item a stage consumed but
/// could not deliver: processing failed, the run was cancelled before the item was processed,
/// or the downstream consumer went away. An item that reached the output is never passed to it.
///
/// Batch stages forward the results of a batch one by one. If the downstream consumer goes away
/// before the first result is written the whole batch is reported here. If it goes away after
/// some results were written, the batch counts as delivered and the remaining results are
/// dropped with a warning, since they cannot be mapped back to input items.
pub trait Processor<I, O>: Send + Sync {
    /// Transforms `input` into an output.
    fn process(
        &self,
        signal: &CancelSignal,
        input: &I,
    ) -> impl Future<Output = PlumbResult<O>> + Send;

    /// Receives an item that will never reach the output, together with the reason.
    fn on_undeliverable(&self, input: I, error: PlumbError);
}

impl<I, O, P> Processor<I, O> for Arc<P>
where
    P: Processor<I, O>,
{
    fn process(
        &self,
        signal: &CancelSignal,
        input: &I,
    ) -> impl Future<Output = PlumbResult<O>> + Send {
        P::process(self, signal, input)
    }

    fn on_undeliverable(&self, input: I, error: PlumbError) {
        P::on_undeliverable(self, input, error)
    }
}

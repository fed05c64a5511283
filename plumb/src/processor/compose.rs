//! Sequential processor composition.
//!
//! A composite returns the first inner error unchanged and does not call any inner
//! `on_undeliverable`: the stage running the composite routes the original item to the
//! composite's [`Processor::on_undeliverable`], which hands it to the first inner processor.
//! Every undeliverable item is therefore reported once, whether it failed in an inner stage or
//! never got processed because the run was cancelled.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use tracing::warn;

use crate::concurrency::cancel::CancelSignal;
use crate::error::{PlumbError, PlumbResult};
use crate::processor::Processor;

/// Runs `first`, then feeds its output to `second`. Built with [`join`].
pub struct Join<A, B, M> {
    first: A,
    second: B,
    _intermediate: PhantomData<fn() -> M>,
}

/// Chains two processors: `I -> M` then `M -> O`.
pub fn join<A, B, M>(first: A, second: B) -> Join<A, B, M> {
    Join {
        first,
        second,
        _intermediate: PhantomData,
    }
}

impl<I, M, O, A, B> Processor<I, O> for Join<A, B, M>
where
    I: Sync,
    M: Send + Sync,
    A: Processor<I, M>,
    B: Processor<M, O>,
{
    fn process(
        &self,
        signal: &CancelSignal,
        input: &I,
    ) -> impl Future<Output = PlumbResult<O>> + Send {
        async move {
            let intermediate = self.first.process(signal, input).await?;
            self.second.process(signal, &intermediate).await
        }
    }

    fn on_undeliverable(&self, input: I, error: PlumbError) {
        self.first.on_undeliverable(input, error);
    }
}

impl<A, B, M> fmt::Debug for Join<A, B, M>
where
    A: fmt::Debug,
    B: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Join")
            .field("first", &self.first)
            .field("second", &self.second)
            .finish()
    }
}

/// Runs same-typed processors one after another. Built with [`sequence`].
#[derive(Debug)]
pub struct Sequence<P> {
    stages: Vec<P>,
}

/// Chains `stages` in order. An empty sequence returns its input unchanged.
pub fn sequence<P>(stages: Vec<P>) -> Sequence<P> {
    Sequence { stages }
}

impl<T, P> Processor<T, T> for Sequence<P>
where
    T: Clone + Send + Sync,
    P: Processor<T, T>,
{
    fn process(
        &self,
        signal: &CancelSignal,
        input: &T,
    ) -> impl Future<Output = PlumbResult<T>> + Send {
        async move {
            let mut current = input.clone();
            for stage in &self.stages {
                current = stage.process(signal, &current).await?;
            }

            Ok(current)
        }
    }

    fn on_undeliverable(&self, input: T, error: PlumbError) {
        match self.stages.first() {
            Some(stage) => stage.on_undeliverable(input, error),
            None => warn!(error = %error, "empty sequence has no handler for undeliverable item"),
        }
    }
}

/// Runs `first` to fan an input out, then `second` on every element. Built with [`apply`].
pub struct Apply<A, B, M> {
    first: A,
    second: B,
    _intermediate: PhantomData<fn() -> M>,
}

/// Chains `I -> Vec<M>` with `M -> O`, producing `Vec<O>`.
///
/// Fails as a whole on the first element `second` rejects.
pub fn apply<A, B, M>(first: A, second: B) -> Apply<A, B, M> {
    Apply {
        first,
        second,
        _intermediate: PhantomData,
    }
}

impl<I, M, O, A, B> Processor<I, Vec<O>> for Apply<A, B, M>
where
    I: Sync,
    M: Send + Sync,
    O: Send,
    A: Processor<I, Vec<M>>,
    B: Processor<M, O>,
{
    fn process(
        &self,
        signal: &CancelSignal,
        input: &I,
    ) -> impl Future<Output = PlumbResult<Vec<O>>> + Send {
        async move {
            let intermediates = self.first.process(signal, input).await?;

            let mut outputs = Vec::with_capacity(intermediates.len());
            for intermediate in &intermediates {
                outputs.push(self.second.process(signal, intermediate).await?);
            }

            Ok(outputs)
        }
    }

    fn on_undeliverable(&self, input: I, error: PlumbError) {
        self.first.on_undeliverable(input, error);
    }
}

impl<A, B, M> fmt::Debug for Apply<A, B, M>
where
    A: fmt::Debug,
    B: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Apply")
            .field("first", &self.first)
            .field("second", &self.second)
            .finish()
    }
}

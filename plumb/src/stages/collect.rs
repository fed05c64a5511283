//! Size and time windowed batching.
//!
//! [`Collector`] buffers items from a stream and releases them as batches. A full buffer is
//! released as soon as it reaches the maximum size, the fill timer releases a non-empty buffer
//! when it elapses, and a fired cancellation signal flushes whatever is buffered right away. A
//! fired signal is observed before the next item is read, so a busy input cannot hold back the
//! flush.
//!
//! Once cancelled the timer is no longer watched. Items keep being read until the input closes:
//! a buffer that receives no new item within [`CANCEL_GRACE_PERIOD`] is released, so late
//! items trickle out in small batches instead of waiting for a fill window that never comes.

use std::time::Duration;

use metrics::{counter, histogram};
use plumb_config::shared::BatchConfig;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::concurrency::cancel::CancelSignal;
use crate::concurrency::pool::spawn_stage;
use crate::concurrency::timer::DeferredTimer;
use crate::metrics::{PLUMB_BATCH_SIZE, PLUMB_BATCHES_EMITTED_TOTAL, REASON_LABEL};
use crate::stages::validate_batch_config;
use crate::stream::{StreamRx, channel};

/// How long a cancelled collector waits for the next item before releasing what it buffered.
/// Restarted by every received item.
pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Why a batch was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchReason {
    Size,
    Timeout,
    Cancelled,
    End,
}

impl BatchReason {
    fn as_str(&self) -> &'static str {
        match self {
            BatchReason::Size => "size",
            BatchReason::Timeout => "timeout",
            BatchReason::Cancelled => "cancelled",
            BatchReason::End => "end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectorPhase {
    /// Normal operation: size, timer and cancellation rules apply.
    Collecting,
    /// Signal fired: only the size rule and the grace period apply.
    Draining,
    /// Input closed. Nothing more is released.
    Exhausted,
}

/// Pull-based batcher driven by the worker that processes its batches.
#[derive(Debug)]
pub(crate) struct Collector<T> {
    input: StreamRx<T>,
    signal: CancelSignal,
    max_size: usize,
    timer: DeferredTimer,
    buffer: Vec<T>,
    phase: CollectorPhase,
}

impl<T> Collector<T> {
    /// Creates a collector and arms its fill timer.
    ///
    /// `config` must already be validated.
    pub(crate) fn new(signal: CancelSignal, config: &BatchConfig, input: StreamRx<T>) -> Self {
        let mut timer = DeferredTimer::new(config.max_fill());
        timer.start();

        Self {
            input,
            signal,
            max_size: config.max_size,
            timer,
            buffer: Vec::new(),
            phase: CollectorPhase::Collecting,
        }
    }

    /// Waits for the next batch, or returns [`None`] once the input is exhausted.
    ///
    /// Released batches are never empty and never larger than the configured maximum size.
    pub(crate) async fn next_batch(&mut self) -> Option<(Vec<T>, BatchReason)> {
        loop {
            match self.phase {
                CollectorPhase::Collecting => {
                    tokio::select! {
                        biased;

                        cause = self.signal.cancelled() => {
                            info!(%cause, buffered = self.buffer.len(), "collector observed cancellation, flushing buffer");
                            self.timer.stop();
                            self.phase = CollectorPhase::Draining;
                            if let Some(batch) = self.take(BatchReason::Cancelled) {
                                return Some(batch);
                            }
                        }
                        _ = &mut self.timer => {
                            self.timer.start();
                            if let Some(batch) = self.take(BatchReason::Timeout) {
                                return Some(batch);
                            }
                        }
                        item = self.input.recv() => {
                            let Some(item) = item else {
                                debug!(buffered = self.buffer.len(), "collector input closed");
                                self.phase = CollectorPhase::Exhausted;
                                return self.take(BatchReason::End);
                            };

                            if let Some(batch) = self.push(item, BatchReason::Size) {
                                self.timer.start();
                                return Some(batch);
                            }
                        }
                    }
                }
                CollectorPhase::Draining => {
                    tokio::select! {
                        biased;

                        item = self.input.recv() => {
                            let Some(item) = item else {
                                debug!(buffered = self.buffer.len(), "collector input closed during grace period");
                                self.phase = CollectorPhase::Exhausted;
                                return self.take(BatchReason::End);
                            };

                            if let Some(batch) = self.push(item, BatchReason::Cancelled) {
                                return Some(batch);
                            }
                        }
                        _ = sleep(CANCEL_GRACE_PERIOD), if !self.buffer.is_empty() => {
                            debug!(buffered = self.buffer.len(), "collector grace period elapsed, releasing buffer");
                            return self.take(BatchReason::Cancelled);
                        }
                    }
                }
                CollectorPhase::Exhausted => return None,
            }
        }
    }

    /// Buffers `item`, returning a full batch once the maximum size is reached.
    fn push(&mut self, item: T, reason: BatchReason) -> Option<(Vec<T>, BatchReason)> {
        if self.buffer.is_empty() {
            self.buffer.reserve_exact(self.max_size);
        }
        self.buffer.push(item);

        if self.buffer.len() >= self.max_size {
            return self.take(reason);
        }

        None
    }

    /// Takes the buffered items as a batch, or [`None`] if nothing is buffered.
    fn take(&mut self, reason: BatchReason) -> Option<(Vec<T>, BatchReason)> {
        if self.buffer.is_empty() {
            return None;
        }

        let batch = std::mem::take(&mut self.buffer);

        counter!(PLUMB_BATCHES_EMITTED_TOTAL, REASON_LABEL => reason.as_str()).increment(1);
        histogram!(PLUMB_BATCH_SIZE).record(batch.len() as f64);

        Some((batch, reason))
    }
}

/// Batches `input` into `Vec<T>` chunks according to `config`.
///
/// A batch is released when it reaches `config.max_size` items, when `config.max_fill()`
/// elapses with items buffered, or right away when `signal` fires. Once cancelled, items that
/// keep arriving are still batched, and a partial batch is released after
/// [`CANCEL_GRACE_PERIOD`] without a new item. The output closes when `input` closes.
///
/// # Panics
///
/// Panics if `config` is invalid.
pub fn collect<T>(signal: CancelSignal, config: &BatchConfig, input: StreamRx<T>) -> StreamRx<Vec<T>>
where
    T: Send + 'static,
{
    validate_batch_config("collect", config);

    let mut collector = Collector::new(signal, config, input);
    let (tx, rx) = channel();

    spawn_stage("collect", vec![tx.clone()], async move {
        while let Some((batch, _)) = collector.next_batch().await {
            if let Err(batch) = tx.send(batch).await {
                warn!(dropped = batch.len(), "collect output closed, stopping");
                return;
            }
        }

        debug!("collect input exhausted, closing output");
    });

    rx
}

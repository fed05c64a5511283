//! Bounded, closable streams connecting pipeline stages.
//!
//! A stream is a tokio mpsc channel split into a [`StreamTx`] and a [`StreamRx`]. The stream
//! closes once every [`StreamTx`] is dropped and the remaining items were received. Cloning a
//! [`StreamRx`] adds a competing consumer: every item is handed to exactly one receiver, which
//! is how concurrent workers share an input.
//!
//! A stage whose task panics marks its output streams failed before they close. Receiving from
//! a failed stream panics once the buffered items are consumed, so a panic travels downstream
//! to whoever consumes the final output instead of looking like a normal end of stream.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{Stream, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::concurrency::pool::spawn_stage;

/// Number of items a stream buffers before writes block.
///
/// One slot keeps stages close to the rendezvous semantics of an unbuffered channel while
/// letting a producer hand over an item without waiting for the consumer to be scheduled.
pub const DEFAULT_STREAM_CAPACITY: usize = 1;

/// Creates a stream with [`DEFAULT_STREAM_CAPACITY`].
pub fn channel<T>() -> (StreamTx<T>, StreamRx<T>) {
    channel_with_capacity(DEFAULT_STREAM_CAPACITY)
}

/// Creates a stream buffering up to `capacity` items.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channel_with_capacity<T>(capacity: usize) -> (StreamTx<T>, StreamRx<T>) {
    assert!(capacity > 0, "stream capacity must be greater than zero");

    let (tx, rx) = mpsc::channel(capacity);
    let failed = Arc::new(AtomicBool::new(false));

    (
        StreamTx {
            tx,
            failed: failed.clone(),
        },
        StreamRx {
            rx: Arc::new(Mutex::new(rx)),
            failed,
        },
    )
}

/// Sending half of a stream.
pub struct StreamTx<T> {
    tx: mpsc::Sender<T>,
    failed: Arc<AtomicBool>,
}

impl<T> StreamTx<T> {
    /// Sends `item`, waiting while the stream is full.
    ///
    /// Returns the item back if every receiver was dropped.
    pub async fn send(&self, item: T) -> Result<(), T> {
        self.tx.send(item).await.map_err(|err| err.0)
    }

    /// Waits for capacity and reserves a slot for one item.
    ///
    /// Returns [`None`] if every receiver was dropped. Cancel safe, which lets a caller give up
    /// waiting for capacity without losing the item it holds.
    pub async fn reserve(&self) -> Option<mpsc::Permit<'_, T>> {
        self.tx.reserve().await.ok()
    }

    /// Returns `true` once every receiver was dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Completes once every receiver was dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Marks the stream as ended by a panic in the stage writing it.
    pub(crate) fn fail(&self) {
        self.failed.store(true, Ordering::Release);
    }
}

impl<T> Clone for StreamTx<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            failed: self.failed.clone(),
        }
    }
}

impl<T> fmt::Debug for StreamTx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTx")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Receiving half of a stream.
pub struct StreamRx<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    failed: Arc<AtomicBool>,
}

impl<T> StreamRx<T> {
    /// Receives the next item, or [`None`] once the stream is closed and empty.
    ///
    /// Cancel safe: if the future is dropped before completing no item is lost.
    ///
    /// # Panics
    ///
    /// Panics when the stream closed because the stage writing it panicked.
    pub async fn recv(&self) -> Option<T> {
        let item = self.rx.lock().await.recv().await;
        if item.is_none() && self.failed.load(Ordering::Acquire) {
            panic!("stream closed because an upstream stage panicked");
        }

        item
    }

    /// Converts the receiver into a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = T> + Send
    where
        T: Send,
    {
        futures::stream::unfold(self, |rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
    }

    /// Receives every remaining item until the stream closes.
    pub async fn collect_vec(self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }

        items
    }
}

impl<T> StreamRx<T>
where
    T: Send + 'static,
{
    /// Feeds every item of `stream` into a new stream, closing it when `stream` ends.
    ///
    /// Must be called within a tokio runtime.
    pub fn from_stream<S>(stream: S) -> StreamRx<T>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let (tx, rx) = channel();

        spawn_stage("from_stream", vec![tx.clone()], async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(item) = stream.next().await {
                if tx.send(item).await.is_err() {
                    debug!("stream receiver dropped, stopping source");
                    return;
                }
            }
        });

        rx
    }
}

impl<T> Clone for StreamRx<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            failed: self.failed.clone(),
        }
    }
}

impl<T> fmt::Debug for StreamRx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRx")
            .field("consumers", &Arc::strong_count(&self.rx))
            .finish()
    }
}

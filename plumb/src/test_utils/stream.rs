use std::time::Duration;

use tokio::time::timeout;

use crate::stream::StreamRx;

/// Default time a test waits for a stream to close.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Collects every item of `stream`, panicking if it does not close within
/// [`DEFAULT_STREAM_TIMEOUT`].
pub async fn collect_with_timeout<T>(stream: StreamRx<T>) -> Vec<T> {
    collect_within(stream, DEFAULT_STREAM_TIMEOUT).await
}

/// Collects every item of `stream`, panicking if it does not close within `duration`.
///
/// # Panics
///
/// Panics when `duration` elapses first. This is intentional so that tests fail fast rather
/// than hang on a stage that never closes its output.
pub async fn collect_within<T>(stream: StreamRx<T>, duration: Duration) -> Vec<T> {
    match timeout(duration, stream.collect_vec()).await {
        Ok(items) => items,
        Err(_) => panic!(
            "Stream did not close after {duration:?}. \
             Check that every sender was dropped and every stage saw its input close."
        ),
    }
}

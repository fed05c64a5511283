use tracing::debug;

use crate::stream::StreamRx;

/// Consumes `input` until it closes, discarding the items. Returns how many were read.
pub async fn drain<T>(input: StreamRx<T>) -> usize {
    let mut count = 0;
    while input.recv().await.is_some() {
        count += 1;
    }

    debug!(count, "drained stream");

    count
}

use tracing::debug;

use crate::concurrency::pool::spawn_stage;
use crate::stream::{StreamRx, channel};

/// Returns a stream yielding `items` in order, closed after the last one.
pub fn emit<T, I>(items: I) -> StreamRx<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    let items = items.into_iter();
    let (tx, rx) = channel();

    spawn_stage("emit", vec![tx.clone()], async move {
        for item in items {
            if tx.send(item).await.is_err() {
                debug!("emit receiver dropped, stopping");
                return;
            }
        }
    });

    rx
}

use std::future::Future;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};

use crate::concurrency::semaphore::Semaphore;
use crate::stream::StreamTx;

/// Spawns the single task driving a stage.
///
/// A supervisor keeps its own clones of `outputs` until `task` returned. If `task` panicked the
/// outputs are marked failed before they close, so every downstream receiver panics instead of
/// mistaking the failure for a clean end of stream.
pub(crate) fn spawn_stage<T, Fut>(stage: &'static str, outputs: Vec<StreamTx<T>>, task: Fut)
where
    T: Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(task);

    tokio::spawn(async move {
        if let Err(err) = handle.await {
            fail_outputs(stage, &outputs, &err);
        }
    });
}

/// Spawns `workers` tasks sharing `output` and closes it once all of them finished.
///
/// Each worker holds one permit of a [`Semaphore`] sized to `workers`. The coordinator drains
/// the semaphore, joins every worker and only then drops its own sender, so the output closes
/// exactly when the last worker returned. A panicking worker marks the output failed.
pub(crate) fn spawn_workers<O, F, Fut>(
    stage: &'static str,
    workers: usize,
    output: StreamTx<O>,
    make_worker: F,
) where
    O: Send + 'static,
    F: Fn(usize, StreamTx<O>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    assert!(workers > 0, "{stage} requires at least one worker");

    tokio::spawn(async move {
        let semaphore = Semaphore::new(workers);
        let mut join_set = JoinSet::new();

        for worker_id in 0..workers {
            let Ok(guard) = semaphore.acquire_guard().await else {
                break;
            };

            let worker = make_worker(worker_id, output.clone());
            join_set.spawn(async move {
                debug!(stage, worker_id, "worker started");
                // The worker future owns its sender, which is dropped before the permit.
                worker.await;
                debug!(stage, worker_id, "worker finished");
                drop(guard);
            });
        }

        semaphore.drain().await;

        while let Some(result) = join_set.join_next().await {
            if let Err(err) = result {
                fail_outputs(stage, std::slice::from_ref(&output), &err);
            }
        }

        debug!(stage, workers, "all workers finished, closing output");
        drop(output);
    });
}

fn fail_outputs<T>(stage: &'static str, outputs: &[StreamTx<T>], err: &JoinError) {
    if err.is_panic() {
        error!(stage, "stage task panicked, failing its output");
    } else {
        error!(stage, error = %err, "stage task was aborted, failing its output");
    }

    for output in outputs {
        output.fail();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::channel;

    #[tokio::test]
    async fn output_closes_after_every_worker_returned() {
        let (tx, rx) = channel();

        spawn_workers("test", 3, tx, |worker_id, output| async move {
            let _ = output.send(worker_id).await;
        });

        let mut ids = rx.collect_vec().await;
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[tokio::test]
    #[should_panic(expected = "upstream stage panicked")]
    async fn panicking_worker_fails_the_output() {
        let (tx, rx) = channel::<usize>();

        spawn_workers("test", 2, tx, |worker_id, output| async move {
            if worker_id == 1 {
                panic!("worker {worker_id} gave up");
            }
            let _ = output.send(worker_id).await;
        });

        rx.collect_vec().await;
    }

    #[tokio::test]
    #[should_panic(expected = "upstream stage panicked")]
    async fn panicking_stage_task_fails_every_output() {
        let (first_tx, first_rx) = channel::<u32>();
        let (second_tx, _second_rx) = channel::<u32>();

        spawn_stage(
            "test",
            vec![first_tx.clone(), second_tx.clone()],
            async move {
                let _outputs = (first_tx, second_tx);
                panic!("routing failed");
            },
        );

        first_rx.collect_vec().await;
    }
}

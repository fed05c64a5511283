//! Shared, monotonic cancellation signal.
//!
//! [`create_cancel_channel`] returns a [`CancelHandle`], kept by whoever owns the pipeline run,
//! and a [`CancelSignal`] that is cloned into every stage. The signal is a tokio watch channel
//! holding `Option<CancelCause>`: it starts empty, the first [`CancelHandle::cancel_with`] stores
//! a cause and later calls are ignored.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ErrorKind, PlumbError};
use crate::plumb_error;

/// Why a pipeline run was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelCause {
    /// The owner explicitly stopped the run.
    Stopped,
    /// A deadline attached with [`CancelSignal::with_deadline`] elapsed.
    DeadlineExceeded,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Stopped => f.write_str("stopped"),
            CancelCause::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

impl From<CancelCause> for PlumbError {
    #[track_caller]
    fn from(cause: CancelCause) -> PlumbError {
        match cause {
            CancelCause::Stopped => plumb_error!(ErrorKind::Cancelled, "Pipeline run was cancelled"),
            CancelCause::DeadlineExceeded => plumb_error!(
                ErrorKind::DeadlineExceeded,
                "Pipeline run deadline exceeded"
            ),
        }
    }
}

/// Owner side of the cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<Option<CancelCause>>>,
}

impl CancelHandle {
    /// Fires the signal with [`CancelCause::Stopped`].
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelCause::Stopped)
    }

    /// Fires the signal with `cause`.
    ///
    /// Returns `true` if this call fired the signal and `false` if it had already fired, in
    /// which case the original cause is kept.
    pub fn cancel_with(&self, cause: CancelCause) -> bool {
        // `send_if_modified` works without subscribers, so cancelling is always recorded.
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }

            *current = Some(cause);
            true
        })
    }

    /// Returns whether the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Creates a new [`CancelSignal`] observing this handle.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Completes once every [`CancelSignal`] of this handle has been dropped.
    async fn unobserved(&self) {
        self.tx.closed().await
    }
}

/// Read-only view of the cancellation signal shared by every stage.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<Option<CancelCause>>,
}

impl CancelSignal {
    /// Returns a signal that never fires.
    pub fn never() -> CancelSignal {
        let (_, rx) = watch::channel(None);
        CancelSignal { rx }
    }

    /// Returns the cancellation cause, if the signal has fired.
    pub fn cause(&self) -> Option<CancelCause> {
        *self.rx.borrow()
    }

    /// Returns whether the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    /// Waits until the signal fires and returns its cause.
    ///
    /// Resolves immediately when the signal already fired. If the handle is dropped without
    /// firing, the returned future stays pending forever.
    pub async fn cancelled(&self) -> CancelCause {
        let mut rx = self.rx.clone();
        let fired = match rx.wait_for(Option::is_some).await {
            Ok(cause) => *cause,
            Err(_) => None,
        };

        match fired {
            Some(cause) => cause,
            None => std::future::pending().await,
        }
    }

    /// Derives a signal that additionally fires with [`CancelCause::DeadlineExceeded`] after
    /// `timeout`. See [`CancelSignal::with_deadline`].
    pub fn with_timeout(&self, timeout: Duration) -> CancelSignal {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a signal that fires when this one fires (with the same cause) or when `deadline`
    /// is reached, whichever comes first.
    ///
    /// The parent is never affected by the derived signal. Must be called from within a tokio
    /// runtime.
    pub fn with_deadline(&self, deadline: Instant) -> CancelSignal {
        let (handle, signal) = create_cancel_channel();

        if let Some(cause) = self.cause() {
            handle.cancel_with(cause);
            return signal;
        }

        let parent = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                cause = parent.cancelled() => {
                    handle.cancel_with(cause);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("derived cancellation signal reached its deadline");
                    handle.cancel_with(CancelCause::DeadlineExceeded);
                }
                _ = handle.unobserved() => {}
            }
        });

        signal
    }
}

/// Creates a new cancellation channel in the not-cancelled state.
pub fn create_cancel_channel() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(None);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn first_cause_wins() {
        let (handle, signal) = create_cancel_channel();

        assert!(!signal.is_cancelled());
        assert!(handle.cancel_with(CancelCause::DeadlineExceeded));
        assert!(!handle.cancel());

        assert_eq!(signal.cause(), Some(CancelCause::DeadlineExceeded));
        assert!(handle.is_cancelled());
    }

    #[test]
    fn signals_created_after_cancellation_observe_it() {
        let (handle, _) = create_cancel_channel();
        handle.cancel();

        assert_eq!(handle.signal().cause(), Some(CancelCause::Stopped));
    }

    #[tokio::test]
    async fn cancelled_resolves_with_cause() {
        let (handle, signal) = create_cancel_channel();

        let waiter = tokio::spawn(async move { signal.cancelled().await });
        handle.cancel();

        assert_eq!(waiter.await.unwrap(), CancelCause::Stopped);
    }

    #[tokio::test]
    async fn cancelled_survives_dropped_handle_after_firing() {
        let (handle, signal) = create_cancel_channel();
        handle.cancel();
        drop(handle);

        assert_eq!(signal.cancelled().await, CancelCause::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn never_signal_stays_pending() {
        let signal = CancelSignal::never();

        assert!(
            timeout(Duration::from_secs(60), signal.cancelled())
                .await
                .is_err()
        );
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn derived_signal_fires_at_deadline() {
        let (handle, parent) = create_cancel_channel();
        let derived = parent.with_timeout(Duration::from_millis(100));

        assert_eq!(derived.cancelled().await, CancelCause::DeadlineExceeded);
        assert!(!parent.is_cancelled());
        assert!(!handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn derived_signal_follows_parent_cause() {
        let (handle, parent) = create_cancel_channel();
        let derived = parent.with_timeout(Duration::from_secs(10));

        handle.cancel();

        assert_eq!(derived.cancelled().await, CancelCause::Stopped);
    }

    #[tokio::test]
    async fn derived_from_cancelled_parent_is_cancelled() {
        let (handle, parent) = create_cancel_channel();
        handle.cancel_with(CancelCause::DeadlineExceeded);

        let derived = parent.with_timeout(Duration::from_secs(10));

        assert_eq!(derived.cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[test]
    fn causes_map_to_error_kinds() {
        assert_eq!(
            PlumbError::from(CancelCause::Stopped).kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            PlumbError::from(CancelCause::DeadlineExceeded).kind(),
            ErrorKind::DeadlineExceeded
        );
    }
}

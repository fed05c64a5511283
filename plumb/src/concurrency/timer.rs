//! Arm-on-demand timer for `tokio::select!` loops.
//!
//! [`DeferredTimer`] stays pending until [`DeferredTimer::start`] arms it, which makes it usable
//! as an always-present select branch that only fires while a window is open. The collector arms
//! it when a fill window opens, re-arms it after every emitted batch and disarms it once
//! cancellation is observed.

use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::time::{Sleep, sleep};

/// A future that resolves once the armed duration has elapsed.
///
/// `Unpin`, so `&mut timer` can be awaited directly inside `select!`. Once elapsed it keeps
/// resolving immediately until re-armed or stopped.
#[derive(Debug)]
pub struct DeferredTimer {
    deadline: Option<Pin<Box<Sleep>>>,
    duration: Duration,
}

impl DeferredTimer {
    /// Creates an inactive timer for `duration`.
    pub fn new(duration: Duration) -> Self {
        Self {
            deadline: None,
            duration,
        }
    }

    /// Arms the timer, replacing any previous deadline.
    pub fn start(&mut self) {
        match self.deadline.as_mut() {
            Some(deadline) => deadline
                .as_mut()
                .reset(tokio::time::Instant::now() + self.duration),
            None => self.deadline = Some(Box::pin(sleep(self.duration))),
        }
    }

    /// Disarms the timer. It stays pending until started again.
    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Returns whether the timer is armed.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }
}

impl Future for DeferredTimer {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let Some(deadline) = this.deadline.as_mut() else {
            return Poll::Pending;
        };

        ready!(deadline.as_mut().poll(cx));

        Poll::Ready(())
    }
}

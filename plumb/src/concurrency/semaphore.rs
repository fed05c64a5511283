//! Counting semaphore with a single-use drain.
//!
//! Unlike [`tokio::sync::Semaphore`], permits acquired here carry no identity: any task may
//! release permits acquired by another. [`Semaphore::drain`] waits for every outstanding permit
//! to come back and then closes the semaphore for good. Stages use it to learn that all of their
//! workers finished before closing their output.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tracing::error;

/// Errors returned by [`Semaphore::acquire`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SemaphoreError {
    #[error("semaphore has been drained")]
    Drained,
}

#[derive(Debug)]
struct SemaphoreInner {
    permits: tokio::sync::Semaphore,
    max: usize,
    outstanding: AtomicUsize,
}

/// Counting permit primitive bounding concurrent operations to `max`.
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<SemaphoreInner>,
}

impl Semaphore {
    /// Creates a semaphore with `max` permits.
    ///
    /// # Panics
    ///
    /// Panics if `max` is zero or does not fit in a `u32`.
    pub fn new(max: usize) -> Self {
        assert!(max > 0, "semaphore capacity must be greater than zero");
        assert!(
            u32::try_from(max).is_ok() && max <= tokio::sync::Semaphore::MAX_PERMITS,
            "semaphore capacity {max} is too large"
        );

        Self {
            inner: Arc::new(SemaphoreInner {
                permits: tokio::sync::Semaphore::new(max),
                max,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns the capacity of the semaphore.
    pub fn max(&self) -> usize {
        self.inner.max
    }

    /// Returns the number of permits currently acquired and not yet released.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Waits until `n` permits are available and reserves them.
    ///
    /// Returns [`SemaphoreError::Drained`] once [`Semaphore::drain`] has completed or while it is
    /// pending ahead of this call.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero or larger than the capacity.
    pub async fn acquire(&self, n: usize) -> Result<(), SemaphoreError> {
        assert!(n > 0, "semaphore acquire requires a positive permit count");
        assert!(
            n <= self.inner.max,
            "cannot acquire {n} permits from a semaphore of capacity {}",
            self.inner.max
        );

        // `n <= max` and `max` fits in a `u32`.
        let permit = self
            .inner
            .permits
            .acquire_many(n as u32)
            .await
            .map_err(|_| SemaphoreError::Drained)?;
        permit.forget();

        self.inner.outstanding.fetch_add(n, Ordering::AcqRel);

        Ok(())
    }

    /// Acquires a single permit released when the returned guard is dropped.
    pub async fn acquire_guard(&self) -> Result<SemaphoreGuard, SemaphoreError> {
        self.acquire(1).await?;

        Ok(SemaphoreGuard {
            semaphore: self.clone(),
        })
    }

    /// Returns `n` permits, waking blocked acquirers.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero or more than the number of outstanding permits.
    pub fn release(&self, n: usize) {
        assert!(n > 0, "semaphore release requires a positive permit count");

        let released =
            self.inner
                .outstanding
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |outstanding| {
                    outstanding.checked_sub(n)
                });

        if let Err(outstanding) = released {
            error!(n, outstanding, "semaphore released more permits than acquired");
            panic!("cannot release {n} permits, only {outstanding} are outstanding");
        }

        self.inner.permits.add_permits(n);
    }

    /// Waits until every acquired permit has been released, then closes the semaphore.
    ///
    /// The full capacity is acquired before closing, so no [`Semaphore::acquire`] can succeed
    /// once this returns. Calling it more than once is allowed.
    pub async fn drain(&self) {
        // `max` fits in a `u32`.
        if let Ok(permits) = self.inner.permits.acquire_many(self.inner.max as u32).await {
            permits.forget();
        }

        self.inner.permits.close();
    }

    /// Returns whether [`Semaphore::drain`] has completed.
    pub fn is_drained(&self) -> bool {
        self.inner.permits.is_closed()
    }
}

/// RAII guard releasing one permit on drop.
#[derive(Debug)]
pub struct SemaphoreGuard {
    semaphore: Semaphore,
}

impl Drop for SemaphoreGuard {
    fn drop(&mut self) {
        self.semaphore.release(1);
    }
}

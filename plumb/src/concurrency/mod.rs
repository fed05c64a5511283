//! Concurrency primitives shared by every stage.
//!
//! - [`cancel`] implements the per-run cancellation signal: a single owner fires it with a
//!   [`cancel::CancelCause`], every stage observes it and nothing can clear it.
//! - [`semaphore`] bounds how many workers run at once and tells a stage when all of them are
//!   done, so it can close its output stream.
//! - [`timer`] is an arm-on-demand timer used for the collector's fill window.
//! - [`pool`] spawns a fixed number of workers under a [`semaphore::Semaphore`] and closes the
//!   shared output once the semaphore is drained.

pub mod cancel;
pub(crate) mod pool;
pub mod semaphore;
pub mod timer;

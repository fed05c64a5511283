//! Helpers for testing pipelines built from this crate.
//!
//! - [`processor`] provides [`processor::RecordingProcessor`], a configurable processor that
//!   records what it processed and what it was handed back as undeliverable.
//! - [`stream`] provides timeout-guarded collection so a stuck pipeline fails the test instead
//!   of hanging it.

pub mod processor;
pub mod stream;

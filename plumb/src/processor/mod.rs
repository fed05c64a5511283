//! The item processor contract and helpers to build and compose processors.

mod base;
mod compose;
mod func;

pub use base::Processor;
pub use compose::{Apply, Join, Sequence, apply, join, sequence};
pub use func::{ProcessorFn, processor_fn};

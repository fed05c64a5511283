//! Shared configuration types for plumb stages.

mod base;
mod batch;
mod stage;

pub use base::ValidationError;
pub use batch::BatchConfig;
pub use stage::StageConfig;

//! Application layer: builds chains and runs them.
//!
//! - [`PipelineBuilder`] / [`Chain::build`]: stage specs to a validated chain
//! - [`Executor`]: scheduler and worker pool
//! - [`RetryPolicy`]: retry bound and backoff
//! - [`RetentionLoop`]: evicts finished chains
//! - [`ChainView`]: status views

pub mod builder;
pub mod executor;
pub mod gc_loop;
pub mod retry;
pub mod status;

pub use self::builder::{Chain, PipelineBuilder, Stage, StageSpec};
pub use self::executor::{ChainHandle, Executor, ExecutorBuilder, ExecutorError};
pub use self::gc_loop::RetentionLoop;
pub use self::retry::{Backoff, RetryPolicy};
pub use self::status::{ChainView, ExecutorStatus, StageView};

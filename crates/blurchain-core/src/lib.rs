//! blurchain-core
//!
//! Background job pipeline engine: runs ordered chains of tasks with
//! constraint-gated dispatch, data hand-off between stages, retry,
//! cancellation and one-active-chain-per-name replacement.
//!
//! # Modules
//! - **domain**: ids, data maps, states, outcomes, task/chain records, events, errors
//! - **ports**: traits at the seams (TaskStore, Clock, IdGenerator, ProgressSink, Constraint, imaging)
//! - **store**: in-memory TaskStore
//! - **typed**: typed task API (TypedTask, DynTask, TaskRegistry)
//! - **app**: pipeline builder, executor, retry policy, retention loop, status views
//! - **impls**: built-in constraints and in-memory capabilities
//! - **stages**: the image blur pipeline
//! - **config**: TOML executor configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod stages;
pub mod store;
pub mod typed;

pub use app::{
    Chain, ChainHandle, Executor, ExecutorBuilder, ExecutorError, PipelineBuilder, RetryPolicy,
    StageSpec,
};
pub use config::{ConfigError, ExecutorConfig};
pub use domain::{
    ChainId, ChainResult, ChainStatus, Data, DataValue, Outcome, ProgressEvent, TaskError, TaskId,
    TaskState,
};

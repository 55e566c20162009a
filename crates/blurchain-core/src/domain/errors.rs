//! Error taxonomy.
//!
//! - [`TaskError`]: raised inside task bodies, translated into an
//!   [`Outcome`](super::Outcome) at the task boundary.
//! - [`BuildError`]: invalid pipeline definitions, raised at build time only.
//! - [`StoreError`]: rejected store operations (programming errors).
//!
//! Cancellation is not an error; a cancelled chain is a normal terminal state.

use thiserror::Error;

use super::ids::{ChainId, TaskId};
use super::state::TaskState;

/// Error returned from a task body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Retryable (I/O timeout, busy resource, ...).
    #[error("transient failure: {0}")]
    Transient(String),

    /// Not retryable (malformed input, quota exceeded, ...).
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The task observed cancellation at a checkpoint.
    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn transient(reason: impl Into<String>) -> Self {
        TaskError::Transient(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        TaskError::Permanent(reason.into())
    }
}

/// Pipeline definition errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("a chain needs at least one stage")]
    NoStages,

    #[error("chain name must not be empty")]
    EmptyChainName,

    #[error("no task registered under '{0}'")]
    UnknownTask(String),

    #[error("stage label '{0}' is used more than once")]
    DuplicateStage(String),

    #[error("stage '{0}' has a zero timeout")]
    ZeroTimeout(String),
}

/// Rejected store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("chain {0} not found")]
    ChainNotFound(ChainId),

    #[error("task {id} is terminal ({from:?}); refusing transition to {to:?}")]
    TerminalState {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("task {id}: illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("task {0} already started; input is immutable")]
    InputFrozen(TaskId),
}

impl StoreError {
    /// The record was already terminal; typically a late outcome after cancellation.
    pub fn is_terminal_rejection(&self) -> bool {
        matches!(self, StoreError::TerminalState { .. })
    }
}

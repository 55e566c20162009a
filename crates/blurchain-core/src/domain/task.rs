//! Task record: one stage of one chain.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::data::Data;
use super::ids::{ChainId, TaskId};
use super::state::TaskState;

/// Uniqueness key of a task.
///
/// Chain tasks are scoped by chain name and stage label as separate fields,
/// so names containing separators can never collide across chains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskName {
    pub scope: Option<String>,
    pub label: String,
}

impl TaskName {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            scope: None,
            label: label.into(),
        }
    }

    pub fn scoped(scope: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            label: label.into(),
        }
    }
}

impl From<&str> for TaskName {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for TaskName {
    fn from(label: String) -> Self {
        Self::new(label)
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{scope:?}[{:?}]", self.label),
            None => write!(f, "{:?}", self.label),
        }
    }
}

/// Single source of truth for a task's state.
///
/// Records are owned by the task store; every other component works on
/// clones and requests changes through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,

    /// At most one non-terminal task per name.
    pub name: Option<TaskName>,

    pub chain_id: Option<ChainId>,
    pub stage_index: usize,

    /// Registry key of the task factory that runs this stage.
    pub task_name: String,

    pub input: Data,

    /// Populated only on success.
    pub output: Option<Data>,

    pub state: TaskState,

    /// Number of `Retry` outcomes so far.
    pub retry_count: u32,
    pub max_retries: u32,

    /// Reason of the last retry or failure.
    pub last_error: Option<String>,

    /// Set once the task first enters Running; input is frozen from then on.
    pub started: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: TaskId, task_name: impl Into<String>, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: None,
            chain_id: None,
            stage_index: 0,
            task_name: task_name.into(),
            input: Data::new(),
            output: None,
            state: TaskState::Enqueued,
            retry_count: 0,
            max_retries,
            last_error: None,
            started: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<TaskName>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn in_chain(mut self, chain_id: ChainId, stage_index: usize) -> Self {
        self.chain_id = Some(chain_id);
        self.stage_index = stage_index;
        self
    }

    pub fn with_input(mut self, input: Data) -> Self {
        self.input = input;
        self
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Whether retries are exhausted after the most recent `Retry`.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count > self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_names_do_not_collide_on_separators() {
        let left = TaskName::scoped("a/b", "c");
        let right = TaskName::scoped("a", "b/c");
        assert_ne!(left, right);
        assert_ne!(TaskName::new("a/b/c"), left);
    }
}

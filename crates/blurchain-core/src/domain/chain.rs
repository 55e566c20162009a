//! Chain record and the result handed back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::data::Data;
use super::ids::{ChainId, TaskId};
use super::state::{ChainStatus, TaskState};

/// Where and why a chain failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainFailure {
    pub stage_index: usize,
    pub stage: String,
    pub reason: String,
}

/// Chain record kept by the task store.
///
/// `status` is derived from the task states on every change (see
/// [`ChainStatus::aggregate`]); it is stored so observers can watch it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainRecord {
    pub id: ChainId,
    pub name: String,

    /// Stage labels, in order.
    pub stages: Vec<String>,

    /// One task per stage, in order.
    pub task_ids: Vec<TaskId>,

    pub constants: Data,

    pub status: ChainStatus,
    pub cancelled: bool,
    pub started: bool,
    pub failure: Option<ChainFailure>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ChainRecord {
    pub fn new(
        id: ChainId,
        name: impl Into<String>,
        stages: Vec<String>,
        task_ids: Vec<TaskId>,
        constants: Data,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            stages,
            task_ids,
            constants,
            status: ChainStatus::Pending,
            cancelled: false,
            started: false,
            failure: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Recompute `status` from task states. Returns true if it changed.
    pub fn refresh_status(&mut self, task_states: &[TaskState], now: DateTime<Utc>) -> bool {
        let status = ChainStatus::aggregate(task_states, self.cancelled, self.started);
        self.updated_at = now;
        if status == self.status {
            return false;
        }
        self.status = status;
        if status.is_terminal() {
            self.finished_at = Some(now);
        }
        true
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Final view of a chain returned by `ChainHandle::wait`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainResult {
    pub chain_id: ChainId,
    pub chain_name: String,
    pub status: ChainStatus,

    /// Output of the last stage. Only set when the chain succeeded.
    pub output: Option<Data>,

    /// Chain-level constants, kept for [`ChainResult::merged_output`].
    pub constants: Data,

    /// Only set when the chain failed.
    pub failure: Option<ChainFailure>,
}

impl ChainResult {
    /// Last stage output merged with the constants, under the same precedence
    /// used between stages.
    pub fn merged_output(&self) -> Option<Data> {
        self.output
            .as_ref()
            .map(|output| Data::merge_under_constants(output, &self.constants))
    }

    pub fn failed_stage(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.stage.as_str())
    }
}

//! Status views: what a chain is doing and why it is stuck.

use serde::{Deserialize, Serialize};

use crate::domain::{ChainFailure, ChainId, ChainRecord, ChainStatus, TaskRecord, TaskState};
use crate::ports::StoreCounts;

/// One stage of a [`ChainView`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageView {
    pub index: usize,
    pub label: String,
    pub state: TaskState,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// Snapshot of a chain and its stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainView {
    pub chain_id: ChainId,
    pub name: String,
    pub status: ChainStatus,
    pub stages: Vec<StageView>,
    pub failure: Option<ChainFailure>,
}

impl ChainView {
    /// `tasks` are the chain's task records in stage order; missing records
    /// (already evicted) are skipped.
    pub fn new(chain: &ChainRecord, tasks: &[TaskRecord]) -> Self {
        let stages = tasks
            .iter()
            .map(|task| StageView {
                index: task.stage_index,
                label: chain
                    .stages
                    .get(task.stage_index)
                    .cloned()
                    .unwrap_or_else(|| task.task_name.clone()),
                state: task.state,
                retry_count: task.retry_count,
                last_error: task.last_error.clone(),
            })
            .collect();
        Self {
            chain_id: chain.id,
            name: chain.name.clone(),
            status: chain.status,
            stages,
            failure: chain.failure.clone(),
        }
    }

    /// The stage currently enqueued or running, if any.
    pub fn current_stage(&self) -> Option<&StageView> {
        self.stages.iter().find(|s| !s.state.is_terminal())
    }
}

/// Executor-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorStatus {
    pub tasks: StoreCounts,
    pub available_permits: usize,
    pub pool_size: usize,
}

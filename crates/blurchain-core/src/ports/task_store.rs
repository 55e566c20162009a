//! TaskStore port: the single mutable shared structure.
//!
//! Every state change of a task or chain goes through these operations, and
//! each operation is atomic. Implementations must never hold their lock
//! across a task execution; callers only hold it for the duration of a call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::domain::{
    ChainId, ChainRecord, ChainStatus, Data, StoreError, TaskId, TaskRecord, TaskState,
};

/// Task counts by state, for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub enqueued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub chains: usize,
}

/// Lazy, finite sequence of a task's states.
///
/// Yields the current state first, then every transition in order, and ends
/// after a terminal state (or when the record is evicted). The store feeds
/// each stream through its own unbounded channel, so a slow reader never
/// blocks a transition and never misses one.
#[derive(Debug)]
pub struct StateStream {
    rx: mpsc::UnboundedReceiver<TaskState>,
    done: bool,
}

impl StateStream {
    pub fn new(rx: mpsc::UnboundedReceiver<TaskState>) -> Self {
        Self { rx, done: false }
    }

    pub async fn next(&mut self) -> Option<TaskState> {
        if self.done {
            return None;
        }
        let state = self.rx.recv().await?;
        if state.is_terminal() {
            self.done = true;
        }
        Some(state)
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> Vec<TaskState> {
        let mut states = Vec::new();
        while let Some(state) = self.next().await {
            states.push(state);
        }
        states
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or replace a task. A non-terminal task holding the same `name`
    /// is cancelled first; its id is returned.
    async fn put(&self, task: TaskRecord) -> Option<TaskId>;

    async fn get(&self, id: TaskId) -> Option<TaskRecord>;

    /// Atomic transition. `output` is stored only on `Succeeded`.
    async fn update_state(
        &self,
        id: TaskId,
        state: TaskState,
        output: Option<Data>,
    ) -> Result<TaskRecord, StoreError>;

    /// Transition to `Failed`, recording `reason`. If the task belongs to a
    /// chain, downstream tasks are cancelled and the chain records the failure.
    async fn fail_task(&self, id: TaskId, reason: String) -> Result<TaskRecord, StoreError>;

    /// Account for a `Retry` outcome: `Running -> Enqueued` with
    /// `retry_count + 1`, or `Failed` once retries are exhausted.
    async fn record_retry(&self, id: TaskId, reason: String) -> Result<TaskRecord, StoreError>;

    /// Set the input of a task that has not started yet.
    async fn set_input(&self, id: TaskId, input: Data) -> Result<(), StoreError>;

    async fn observe(&self, id: TaskId) -> Option<StateStream>;

    /// Register a chain and its tasks. A non-terminal chain with the same name
    /// is cancelled in the same atomic step; its id is returned.
    async fn register_chain(&self, chain: ChainRecord, tasks: Vec<TaskRecord>) -> Option<ChainId>;

    /// `Pending -> Running`. Returns `false` if the chain is no longer
    /// pending (cancelled or replaced in the meantime).
    async fn begin_chain(&self, id: ChainId) -> Result<bool, StoreError>;

    /// Cancel every non-terminal task of the chain and flag it cancelled.
    /// Returns `false` if the chain was already terminal.
    async fn cancel_chain(&self, id: ChainId) -> Result<bool, StoreError>;

    /// Resolve the active chain holding `name` and cancel it in one atomic
    /// step. Returns the cancelled chain.
    async fn cancel_chain_by_name(&self, name: &str) -> Option<ChainRecord>;

    /// Fail the chain at its first unfinished stage with `reason`. Used when
    /// the executor hits a store error that is not a late transition.
    /// Returns `false` if the chain was already terminal.
    async fn fail_chain(&self, id: ChainId, reason: String) -> Result<bool, StoreError>;

    async fn chain(&self, id: ChainId) -> Option<ChainRecord>;

    /// The non-terminal chain currently holding `name`.
    async fn active_chain(&self, name: &str) -> Option<ChainRecord>;

    async fn observe_chain(&self, id: ChainId) -> Option<watch::Receiver<ChainStatus>>;

    /// Drop a terminal chain and its tasks. Returns whether anything was removed.
    async fn evict_chain(&self, id: ChainId) -> bool;

    /// Evict terminal chains that finished before `cutoff`. Returns the count.
    async fn prune_terminal(&self, cutoff: DateTime<Utc>) -> usize;

    async fn counts_by_state(&self) -> StoreCounts;
}

//! In-memory task store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, warn};

use crate::domain::{
    ChainFailure, ChainId, ChainRecord, ChainStatus, Data, StoreError, TaskId, TaskName,
    TaskRecord, TaskState,
};
use crate::ports::{Clock, StateStream, StoreCounts, SystemClock, TaskStore};

struct TaskEntry {
    record: TaskRecord,

    /// One sender per `observe` call.
    watchers: Vec<mpsc::UnboundedSender<TaskState>>,
}

impl TaskEntry {
    fn new(record: TaskRecord) -> Self {
        Self {
            record,
            watchers: Vec::new(),
        }
    }

    fn notify(&mut self, state: TaskState) {
        self.watchers.retain(|w| w.send(state).is_ok());
        if state.is_terminal() {
            self.watchers.clear();
        }
    }
}

struct ChainEntry {
    record: ChainRecord,
    tx: watch::Sender<ChainStatus>,
}

/// Everything behind the store lock.
#[derive(Default)]
struct StoreState {
    tasks: HashMap<TaskId, TaskEntry>,

    /// Uniqueness index: task name -> task currently holding it.
    task_names: HashMap<TaskName, TaskId>,

    chains: HashMap<ChainId, ChainEntry>,

    /// Uniqueness index: chain name -> active chain.
    chain_names: HashMap<String, ChainId>,
}

impl StoreState {
    fn task(&self, id: TaskId) -> Result<&TaskRecord, StoreError> {
        self.tasks
            .get(&id)
            .map(|e| &e.record)
            .ok_or(StoreError::TaskNotFound(id))
    }

    fn check_transition(record: &TaskRecord, to: TaskState) -> Result<(), StoreError> {
        if record.state.is_terminal() {
            return Err(StoreError::TerminalState {
                id: record.id,
                from: record.state,
                to,
            });
        }
        if !record.state.can_transition_to(to) {
            return Err(StoreError::IllegalTransition {
                id: record.id,
                from: record.state,
                to,
            });
        }
        Ok(())
    }

    /// Apply a validated transition and propagate it to the owning chain.
    fn apply(
        &mut self,
        id: TaskId,
        to: TaskState,
        output: Option<Data>,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError> {
        let entry = self.tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
        Self::check_transition(&entry.record, to)?;

        let from = entry.record.state;
        entry.record.state = to;
        entry.record.updated_at = now;
        match to {
            TaskState::Running => entry.record.started = true,
            TaskState::Succeeded => entry.record.output = Some(output.unwrap_or_default()),
            _ => {}
        }
        entry.notify(to);
        let record = entry.record.clone();
        debug!(task_id = %id, ?from, ?to, "task transition");

        if to.is_terminal()
            && let Some(name) = &record.name
            && self.task_names.get(name) == Some(&id)
        {
            self.task_names.remove(name);
        }

        if let Some(chain_id) = record.chain_id {
            if to == TaskState::Failed {
                self.record_chain_failure(chain_id, &record, now);
            }
            self.refresh_chain(chain_id, now);
        }
        Ok(record)
    }

    /// Cancel the tasks after a failed stage and remember where the chain failed.
    fn record_chain_failure(&mut self, chain_id: ChainId, failed: &TaskRecord, now: DateTime<Utc>) {
        let Some(chain) = self.chains.get_mut(&chain_id) else {
            return;
        };
        let stage = chain
            .record
            .stages
            .get(failed.stage_index)
            .cloned()
            .unwrap_or_else(|| failed.task_name.clone());
        chain.record.failure = Some(ChainFailure {
            stage_index: failed.stage_index,
            stage,
            reason: failed
                .last_error
                .clone()
                .unwrap_or_else(|| "failed".to_string()),
        });
        let downstream: Vec<TaskId> = chain
            .record
            .task_ids
            .iter()
            .skip(failed.stage_index + 1)
            .copied()
            .collect();
        for task_id in downstream {
            self.cancel_task(task_id, now);
        }
    }

    /// Cancel a task if it is still active. Does not refresh the chain.
    fn cancel_task(&mut self, id: TaskId, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.tasks.get_mut(&id) else {
            return false;
        };
        if entry.record.state.is_terminal() {
            return false;
        }
        entry.record.state = TaskState::Cancelled;
        entry.record.updated_at = now;
        entry.notify(TaskState::Cancelled);
        if let Some(name) = &entry.record.name
            && self.task_names.get(name) == Some(&id)
        {
            self.task_names.remove(name);
        }
        true
    }

    fn refresh_chain(&mut self, chain_id: ChainId, now: DateTime<Utc>) {
        let Some(chain) = self.chains.get(&chain_id) else {
            return;
        };
        let states: Vec<TaskState> = chain
            .record
            .task_ids
            .iter()
            .map(|id| {
                self.tasks
                    .get(id)
                    .map(|e| e.record.state)
                    .unwrap_or(TaskState::Cancelled)
            })
            .collect();

        let Some(chain) = self.chains.get_mut(&chain_id) else {
            return;
        };
        if chain.record.refresh_status(&states, now) {
            let status = chain.record.status;
            chain.tx.send_replace(status);
            debug!(chain_id = %chain_id, chain = %chain.record.name, ?status, "chain status");
            if status.is_terminal() && self.chain_names.get(&chain.record.name) == Some(&chain_id) {
                self.chain_names.remove(&chain.record.name);
            }
        }
    }

    fn cancel_chain(&mut self, chain_id: ChainId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let chain = self
            .chains
            .get_mut(&chain_id)
            .ok_or(StoreError::ChainNotFound(chain_id))?;
        if chain.record.status.is_terminal() {
            return Ok(false);
        }
        chain.record.cancelled = true;
        let task_ids = chain.record.task_ids.clone();
        for task_id in task_ids {
            self.cancel_task(task_id, now);
        }
        self.refresh_chain(chain_id, now);
        Ok(true)
    }

    /// Fail the chain at its first unfinished stage with `reason`, outside the
    /// normal transition table. Later stages are cancelled.
    fn fail_chain(
        &mut self,
        chain_id: ChainId,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let chain = self
            .chains
            .get(&chain_id)
            .ok_or(StoreError::ChainNotFound(chain_id))?;
        if chain.record.status.is_terminal() {
            return Ok(false);
        }
        let current = chain
            .record
            .task_ids
            .iter()
            .copied()
            .find(|id| self.tasks.get(id).is_some_and(|e| !e.record.state.is_terminal()));
        let Some(task_id) = current else {
            return Ok(false);
        };

        let Some(entry) = self.tasks.get_mut(&task_id) else {
            return Ok(false);
        };
        entry.record.state = TaskState::Failed;
        entry.record.last_error = Some(reason);
        entry.record.updated_at = now;
        entry.notify(TaskState::Failed);
        let record = entry.record.clone();
        if let Some(name) = &record.name
            && self.task_names.get(name) == Some(&task_id)
        {
            self.task_names.remove(name);
        }

        self.record_chain_failure(chain_id, &record, now);
        self.refresh_chain(chain_id, now);
        Ok(true)
    }

    /// Insert a task, cancelling the previous active holder of its name.
    /// A previous holder that belongs to a chain takes its whole chain down
    /// with it, so no chain is left terminal with enqueued tasks.
    fn put(&mut self, task: TaskRecord, now: DateTime<Utc>) -> Option<TaskId> {
        let mut replaced = None;
        if let Some(name) = &task.name
            && let Some(&previous) = self.task_names.get(name)
            && previous != task.id
        {
            let owner = self.tasks.get(&previous).and_then(|e| e.record.chain_id);
            let cancelled = match owner {
                Some(chain_id) => matches!(self.cancel_chain(chain_id, now), Ok(true)),
                None => self.cancel_task(previous, now),
            };
            if cancelled {
                replaced = Some(previous);
            }
        }

        let id = task.id;
        if let Some(name) = &task.name
            && !task.state.is_terminal()
        {
            self.task_names.insert(name.clone(), id);
        }
        match self.tasks.get_mut(&id) {
            Some(entry) => {
                let state = task.state;
                entry.record = task;
                entry.notify(state);
            }
            None => {
                self.tasks.insert(id, TaskEntry::new(task));
            }
        }
        replaced
    }

    fn evict_chain(&mut self, chain_id: ChainId) -> bool {
        let Some(chain) = self.chains.get(&chain_id) else {
            return false;
        };
        if chain.record.is_active() {
            return false;
        }
        let Some(chain) = self.chains.remove(&chain_id) else {
            return false;
        };
        for task_id in &chain.record.task_ids {
            if let Some(entry) = self.tasks.remove(task_id)
                && let Some(name) = &entry.record.name
                && self.task_names.get(name) == Some(task_id)
            {
                self.task_names.remove(name);
            }
        }
        if self.chain_names.get(&chain.record.name) == Some(&chain_id) {
            self.chain_names.remove(&chain.record.name);
        }
        true
    }
}

/// In-memory [`TaskStore`].
///
/// One lock guards all records; every trait method takes it once and
/// releases it before returning, so no lock is ever held while a task runs.
pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            clock,
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn put(&self, task: TaskRecord) -> Option<TaskId> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let replaced = state.put(task, now);
        if let Some(previous) = replaced {
            debug!(task_id = %previous, "replaced task with the same name");
        }
        replaced
    }

    async fn get(&self, id: TaskId) -> Option<TaskRecord> {
        let state = self.state.lock().await;
        state.tasks.get(&id).map(|e| e.record.clone())
    }

    async fn update_state(
        &self,
        id: TaskId,
        to: TaskState,
        output: Option<Data>,
    ) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.apply(id, to, output, now).inspect_err(|err| {
            if err.is_terminal_rejection() {
                debug!(task_id = %id, %err, "transition rejected");
            } else {
                warn!(task_id = %id, %err, "transition rejected");
            }
        })
    }

    async fn fail_task(&self, id: TaskId, reason: String) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let record = state.task(id)?;
        StoreState::check_transition(record, TaskState::Failed)?;
        if let Some(entry) = state.tasks.get_mut(&id) {
            entry.record.last_error = Some(reason);
        }
        state.apply(id, TaskState::Failed, None, now)
    }

    async fn record_retry(&self, id: TaskId, reason: String) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let record = state.task(id)?;
        StoreState::check_transition(record, TaskState::Enqueued)?;

        let entry = state.tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
        entry.record.retry_count += 1;
        if entry.record.retries_exhausted() {
            entry.record.last_error = Some(format!(
                "retries exhausted ({}/{}): {reason}",
                entry.record.retry_count, entry.record.max_retries
            ));
            state.apply(id, TaskState::Failed, None, now)
        } else {
            entry.record.last_error = Some(reason);
            state.apply(id, TaskState::Enqueued, None, now)
        }
    }

    async fn set_input(&self, id: TaskId, input: Data) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let entry = state.tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
        if entry.record.state.is_terminal() {
            return Err(StoreError::TerminalState {
                id,
                from: entry.record.state,
                to: entry.record.state,
            });
        }
        if entry.record.started {
            return Err(StoreError::InputFrozen(id));
        }
        entry.record.input = input;
        entry.record.updated_at = now;
        Ok(())
    }

    async fn observe(&self, id: TaskId) -> Option<StateStream> {
        let mut state = self.state.lock().await;
        let entry = state.tasks.get_mut(&id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let current = entry.record.state;
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(current);
        if !current.is_terminal() {
            entry.watchers.push(tx);
        }
        Some(StateStream::new(rx))
    }

    async fn register_chain(&self, chain: ChainRecord, tasks: Vec<TaskRecord>) -> Option<ChainId> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let mut replaced = None;
        if let Some(&previous) = state.chain_names.get(&chain.name)
            && previous != chain.id
            && matches!(state.cancel_chain(previous, now), Ok(true))
        {
            debug!(chain = %chain.name, previous = %previous, "replacing active chain");
            replaced = Some(previous);
        }

        for task in tasks {
            state.put(task, now);
        }
        let id = chain.id;
        state.chain_names.insert(chain.name.clone(), id);
        let (tx, _) = watch::channel(chain.status);
        state.chains.insert(id, ChainEntry { record: chain, tx });
        replaced
    }

    async fn begin_chain(&self, id: ChainId) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let chain = state
            .chains
            .get_mut(&id)
            .ok_or(StoreError::ChainNotFound(id))?;
        if chain.record.status != ChainStatus::Pending {
            return Ok(false);
        }
        chain.record.started = true;
        state.refresh_chain(id, now);
        Ok(true)
    }

    async fn cancel_chain(&self, id: ChainId) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.cancel_chain(id, now)
    }

    async fn cancel_chain_by_name(&self, name: &str) -> Option<ChainRecord> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let id = *state.chain_names.get(name)?;
        match state.cancel_chain(id, now) {
            Ok(true) => state.chains.get(&id).map(|e| e.record.clone()),
            _ => None,
        }
    }

    async fn fail_chain(&self, id: ChainId, reason: String) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.fail_chain(id, reason, now)
    }

    async fn chain(&self, id: ChainId) -> Option<ChainRecord> {
        let state = self.state.lock().await;
        state.chains.get(&id).map(|e| e.record.clone())
    }

    async fn active_chain(&self, name: &str) -> Option<ChainRecord> {
        let state = self.state.lock().await;
        let id = state.chain_names.get(name)?;
        state.chains.get(id).map(|e| e.record.clone())
    }

    async fn observe_chain(&self, id: ChainId) -> Option<watch::Receiver<ChainStatus>> {
        let state = self.state.lock().await;
        state.chains.get(&id).map(|e| e.tx.subscribe())
    }

    async fn evict_chain(&self, id: ChainId) -> bool {
        let mut state = self.state.lock().await;
        state.evict_chain(id)
    }

    async fn prune_terminal(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().await;
        let expired: Vec<ChainId> = state
            .chains
            .values()
            .filter(|e| e.record.finished_at.is_some_and(|at| at < cutoff))
            .map(|e| e.record.id)
            .collect();
        let mut evicted = 0;
        for chain_id in expired {
            if state.evict_chain(chain_id) {
                evicted += 1;
            }
        }

        let loose: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|e| {
                e.record.chain_id.is_none()
                    && e.record.state.is_terminal()
                    && e.record.updated_at < cutoff
            })
            .map(|e| e.record.id)
            .collect();
        for task_id in loose {
            state.tasks.remove(&task_id);
        }
        evicted
    }

    async fn counts_by_state(&self) -> StoreCounts {
        let state = self.state.lock().await;
        let mut counts = StoreCounts {
            chains: state.chains.len(),
            ..StoreCounts::default()
        };
        for entry in state.tasks.values() {
            match entry.record.state {
                TaskState::Enqueued => counts.enqueued += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Succeeded => counts.succeeded += 1,
                TaskState::Failed => counts.failed += 1,
                TaskState::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}

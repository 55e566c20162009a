//! Task and chain state machines.

use serde::{Deserialize, Serialize};

/// Task state.
///
/// Transitions:
/// - Enqueued -> Running -> Succeeded
/// - Enqueued -> Running -> Enqueued (retry, until max_retries)
/// - Enqueued -> Running -> Failed
/// - any non-terminal -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for dispatch (upstream, constraints, backoff or a pool slot).
    Enqueued,

    /// Currently executing on a worker.
    Running,

    Succeeded,

    Failed,

    Cancelled,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether the store accepts `self -> next`.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Cancelled) => true,
            (Enqueued, Running) => true,
            (Running, Enqueued | Succeeded | Failed) => true,
            // A task may fail before it ever runs (timeout of a gated task, retry exhaustion).
            (Enqueued, Failed) => true,
            _ => false,
        }
    }
}

/// Aggregate status of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    /// Registered but not yet dispatched.
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ChainStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChainStatus::Succeeded | ChainStatus::Failed | ChainStatus::Cancelled
        )
    }

    /// Derive the chain status from its tasks, in stage order.
    ///
    /// `cancelled` is the chain-level cancel flag and overrides everything
    /// except a failure that was already recorded. `started` distinguishes
    /// Pending from Running while every task is still Enqueued.
    pub fn aggregate(task_states: &[TaskState], cancelled: bool, started: bool) -> ChainStatus {
        if task_states.contains(&TaskState::Failed) {
            ChainStatus::Failed
        } else if cancelled {
            ChainStatus::Cancelled
        } else if !task_states.is_empty()
            && task_states.iter().all(|&s| s == TaskState::Succeeded)
        {
            ChainStatus::Succeeded
        } else if task_states.contains(&TaskState::Cancelled) {
            // A task was cancelled on its own (name replacement); the chain cannot finish.
            ChainStatus::Cancelled
        } else if started {
            ChainStatus::Running
        } else {
            ChainStatus::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::start(TaskState::Enqueued, TaskState::Running, true)]
    #[case::succeed(TaskState::Running, TaskState::Succeeded, true)]
    #[case::retry(TaskState::Running, TaskState::Enqueued, true)]
    #[case::cancel_queued(TaskState::Enqueued, TaskState::Cancelled, true)]
    #[case::skip_running(TaskState::Enqueued, TaskState::Succeeded, false)]
    #[case::leave_succeeded(TaskState::Succeeded, TaskState::Running, false)]
    #[case::leave_cancelled(TaskState::Cancelled, TaskState::Succeeded, false)]
    #[case::recancel(TaskState::Cancelled, TaskState::Cancelled, false)]
    fn transitions(#[case] from: TaskState, #[case] to: TaskState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn all_succeeded_is_succeeded() {
        let states = [TaskState::Succeeded, TaskState::Succeeded];
        assert_eq!(ChainStatus::aggregate(&states, false, true), ChainStatus::Succeeded);
    }

    #[rstest]
    #[case::running(TaskState::Running)]
    #[case::enqueued(TaskState::Enqueued)]
    fn unfinished_chain_is_running(#[case] state: TaskState) {
        let states = [TaskState::Succeeded, state];
        assert_eq!(ChainStatus::aggregate(&states, false, true), ChainStatus::Running);
    }

    #[test]
    fn failure_dominates() {
        let states = [TaskState::Succeeded, TaskState::Failed, TaskState::Cancelled];
        assert_eq!(ChainStatus::aggregate(&states, true, true), ChainStatus::Failed);
    }

    #[test]
    fn cancel_flag_wins_over_progress() {
        let states = [TaskState::Succeeded, TaskState::Cancelled];
        assert_eq!(ChainStatus::aggregate(&states, true, true), ChainStatus::Cancelled);
    }

    #[test]
    fn not_started_is_pending() {
        let states = [TaskState::Enqueued, TaskState::Enqueued];
        assert_eq!(ChainStatus::aggregate(&states, false, false), ChainStatus::Pending);
    }
}

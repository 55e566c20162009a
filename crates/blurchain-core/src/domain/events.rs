//! Progress events emitted to the host.

use serde::{Deserialize, Serialize};

use super::ids::ChainId;
use super::state::{ChainStatus, TaskState};

/// `(chainName, stageIndex, state)` plus enough context to render it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Stage {
        chain_name: String,
        chain_id: ChainId,
        stage_index: usize,
        stage: String,
        state: TaskState,
    },
    Chain {
        chain_name: String,
        chain_id: ChainId,
        status: ChainStatus,
    },
}

impl ProgressEvent {
    pub fn chain_name(&self) -> &str {
        match self {
            ProgressEvent::Stage { chain_name, .. } | ProgressEvent::Chain { chain_name, .. } => {
                chain_name
            }
        }
    }
}

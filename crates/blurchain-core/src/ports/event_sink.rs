//! Progress sink port.
//!
//! The executor reports `(chainName, stageIndex, state)` here. Emitting must
//! not block and must not fail the chain; sinks swallow their own errors.

use tokio::sync::mpsc;
use tracing::info;

use crate::domain::ProgressEvent;

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: &ProgressEvent) {}
}

/// Logs events at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Stage {
                chain_name,
                stage_index,
                stage,
                state,
                ..
            } => info!(chain = %chain_name, stage_index, stage = %stage, ?state, "stage progress"),
            ProgressEvent::Chain {
                chain_name, status, ..
            } => info!(chain = %chain_name, ?status, "chain progress"),
        }
    }
}

/// Forwards events into an unbounded channel; a closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: &ProgressEvent) {
        let _ = self.tx.send(event.clone());
    }
}

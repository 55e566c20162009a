//! Cleanup stage: deletes the blur temporaries left by earlier runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{artifact_error, pause};
use crate::domain::TaskError;
use crate::ports::ArtifactStore;
use crate::stages::keys::OUTPUT_SCOPE;
use crate::typed::{TaskContext, TypedTask};

/// Ignores its input.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupInput {}

pub struct CleanupTask {
    artifacts: Arc<dyn ArtifactStore>,
    delay: Duration,
}

impl CleanupTask {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            artifacts,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TypedTask for CleanupTask {
    const NAME: &'static str = "cleanup";
    type Input = CleanupInput;
    type Output = ();

    async fn run(&self, ctx: &TaskContext, _input: CleanupInput) -> Result<(), TaskError> {
        pause(ctx, self.delay).await?;
        let removed = self
            .artifacts
            .delete_temporary_artifacts(OUTPUT_SCOPE)
            .await
            .map_err(artifact_error)?;
        info!(chain = ctx.chain_name(), removed, "cleaned up temporary files");
        Ok(())
    }
}

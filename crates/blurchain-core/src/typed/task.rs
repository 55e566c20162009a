//! Typed task contract and the per-invocation context.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::domain::{TaskError, TaskId};

/// A stage body with typed input and output.
///
/// The executor only sees the type-erased [`DynTask`](super::DynTask); the
/// adapter decodes the stage's data map into `Input` and encodes `Output`
/// back into the next stage's data map.
///
/// # Example
/// ```ignore
/// #[derive(Deserialize)]
/// struct Input {
///     #[serde(rename = "imageRef")]
///     image_ref: String,
/// }
///
/// struct Thumbnail;
///
/// #[async_trait]
/// impl TypedTask for Thumbnail {
///     const NAME: &'static str = "thumbnail";
///     type Input = Input;
///     type Output = ();
///
///     async fn run(&self, ctx: &TaskContext, input: Input) -> Result<(), TaskError> {
///         ctx.checkpoint()?;
///         Ok(())
///     }
/// }
/// ```
///
/// Implementations must be idempotent: a `Retry` runs the body again with the
/// same input.
#[async_trait]
pub trait TypedTask: Send + Sync + 'static {
    /// Registry key.
    const NAME: &'static str;

    type Input: DeserializeOwned + Send;
    type Output: Serialize + Send;

    async fn run(&self, ctx: &TaskContext, input: Self::Input) -> Result<Self::Output, TaskError>;
}

/// Handed to every task invocation.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    chain_name: String,
    stage_index: usize,
    attempt: u32,
    token: CancellationToken,
}

impl TaskContext {
    pub fn new(
        task_id: TaskId,
        chain_name: impl Into<String>,
        stage_index: usize,
        attempt: u32,
        token: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            chain_name: chain_name.into(),
            stage_index,
            attempt,
            token,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    pub fn stage_index(&self) -> usize {
        self.stage_index
    }

    /// 1 on the first invocation, incremented on every retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cooperative cancellation point.
    ///
    /// Returns `Err(TaskError::Cancelled)` once the chain has been cancelled;
    /// long-running bodies call it between units of work and propagate with `?`.
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.token.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the chain is cancelled, for use in `select!`.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn checkpoint_reports_cancellation() {
        let token = CancellationToken::new();
        let ctx = TaskContext::new(TaskId::from_ulid(Ulid::new()), "blur-image", 1, 1, token.clone());

        assert!(ctx.checkpoint().is_ok());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.checkpoint(), Err(TaskError::Cancelled));
    }
}

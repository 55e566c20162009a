//! Type erasure between [`TypedTask`] and the executor.

use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::{TaskContext, TypedTask};
use crate::domain::{Data, Outcome, TaskError};

/// Object-safe task: data map in, [`Outcome`] out.
///
/// Stored as `Arc<dyn DynTask>` in the [`TaskRegistry`](super::TaskRegistry).
/// Implement it directly for tasks that want to work on raw data maps.
#[async_trait]
pub trait DynTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &TaskContext, input: Data) -> Outcome;
}

/// Wraps a [`TypedTask`] as a [`DynTask`].
///
/// - input that does not decode: `Failure`
/// - `TaskError::Transient`: `Retry`
/// - `TaskError::Permanent` / `TaskError::Cancelled`: `Failure`
/// - output that is not a flat map: `Failure`
pub struct TypedAdapter<T: TypedTask> {
    task: T,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TypedTask> TypedAdapter<T> {
    pub fn new(task: T) -> Self {
        Self {
            task,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TypedTask> DynTask for TypedAdapter<T> {
    fn name(&self) -> &str {
        T::NAME
    }

    async fn run(&self, ctx: &TaskContext, input: Data) -> Outcome {
        let input: T::Input = match input.decode() {
            Ok(input) => input,
            Err(e) => return Outcome::failure(format!("invalid input for {}: {e}", T::NAME)),
        };
        match self.task.run(ctx, input).await {
            Ok(output) => match Data::encode(&output) {
                Ok(data) => Outcome::success(data),
                Err(e) => Outcome::failure(format!("invalid output from {}: {e}", T::NAME)),
            },
            Err(TaskError::Transient(reason)) => Outcome::retry(reason),
            Err(TaskError::Permanent(reason)) => Outcome::failure(reason),
            Err(TaskError::Cancelled) => Outcome::failure("cancelled"),
        }
    }
}

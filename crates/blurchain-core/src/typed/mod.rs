//! Typed task API.
//!
//! Two layers:
//! - [`TypedTask`]: typed input/output, errors as [`TaskError`](crate::domain::TaskError).
//! - [`DynTask`]: object-safe, data map in and [`Outcome`](crate::domain::Outcome) out.

pub mod handler;
pub mod registry;
pub mod task;

pub use self::handler::{DynTask, TypedAdapter};
pub use self::registry::{RegistryError, TaskRegistry};
pub use self::task::{TaskContext, TypedTask};

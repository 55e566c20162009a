//! Domain model: ids, data maps, states, outcomes, records, events, errors.

pub mod chain;
pub mod data;
pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use chain::{ChainFailure, ChainRecord, ChainResult};
pub use data::{Data, DataError, DataValue};
pub use errors::{BuildError, StoreError, TaskError};
pub use events::ProgressEvent;
pub use ids::{ChainId, TaskId};
pub use outcome::Outcome;
pub use state::{ChainStatus, TaskState};
pub use task::{TaskName, TaskRecord};

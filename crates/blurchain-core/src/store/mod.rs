//! Task store implementations.

mod memory;

pub use memory::InMemoryTaskStore;

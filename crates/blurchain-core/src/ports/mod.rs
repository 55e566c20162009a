//! Ports: the traits the engine talks through.
//!
//! The executor only sees these abstractions; the in-memory store and the
//! stand-in capabilities in `impls` are one set of implementations.

pub mod clock;
pub mod constraint;
pub mod event_sink;
pub mod id_generator;
pub mod imaging;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::constraint::{Constraint, EnvSnapshot, EnvironmentProvider, StaticEnvironment};
pub use self::event_sink::{ChannelSink, NoopSink, ProgressSink, TracingSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::imaging::{
    ArtifactError, ArtifactMetadata, ArtifactStore, Blur, CodecError, ImageCodec, ImageFormat,
    RasterImage,
};
pub use self::task_store::{StateStream, StoreCounts, TaskStore};

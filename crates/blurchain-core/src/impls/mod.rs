//! In-memory implementations of the ports, used by the demo binary and tests.
//!
//! Production hosts plug in real storage, codecs and environment probes.

pub mod artifacts;
pub mod constraints;
pub mod raster;

pub use self::artifacts::InMemoryArtifactStore;
pub use self::constraints::{
    FnConstraint, RequiresBatteryNotLow, RequiresCharging, RequiresStorageNotLow,
};
pub use self::raster::{BoxBlur, RawCodec};

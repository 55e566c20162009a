//! The image blur pipeline: cleanup, one or more blur passes, save.

pub mod blur;
pub mod cleanup;
pub mod keys;
pub mod save;

use std::sync::Arc;
use std::time::Duration;

pub use self::blur::BlurTask;
pub use self::cleanup::CleanupTask;
pub use self::save::SaveTask;

use crate::app::StageSpec;
use crate::domain::{Data, TaskError};
use crate::impls::{RequiresBatteryNotLow, RequiresCharging, RequiresStorageNotLow};
use crate::ports::{ArtifactError, ArtifactStore, Blur, Clock, CodecError, ImageCodec};
use crate::typed::{RegistryError, TaskContext, TaskRegistry, TypedTask};

/// Capabilities the blur stages run against.
#[derive(Clone)]
pub struct BlurCapabilities {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub codec: Arc<dyn ImageCodec>,
    pub blur: Arc<dyn Blur>,
    pub clock: Arc<dyn Clock>,

    /// Simulated work time added to every stage, so progress is visible.
    pub stage_delay: Duration,
}

/// Register `cleanup`, `blur` and `save`.
pub fn register_blur_tasks(
    registry: &mut TaskRegistry,
    caps: &BlurCapabilities,
) -> Result<(), RegistryError> {
    registry.register(CleanupTask::new(Arc::clone(&caps.artifacts)).with_delay(caps.stage_delay))?;
    registry.register(
        BlurTask::new(
            Arc::clone(&caps.artifacts),
            Arc::clone(&caps.codec),
            Arc::clone(&caps.blur),
        )
        .with_delay(caps.stage_delay),
    )?;
    registry.register(
        SaveTask::new(Arc::clone(&caps.artifacts), Arc::clone(&caps.codec))
            .with_clock(Arc::clone(&caps.clock))
            .with_delay(caps.stage_delay),
    )?;
    Ok(())
}

/// Which device conditions gate the pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineConstraints {
    /// Blur stages wait while the battery is low.
    pub battery_not_low: bool,
    /// Save waits while storage is low.
    pub storage_not_low: bool,
    /// Save waits until the device is charging.
    pub charging: bool,
}

/// `cleanup`, `blur_stages` blur stages, `save`.
///
/// A single blur stage is labelled `blur`; several are `blur-1`, `blur-2`, ...
/// The stage count is clamped to at least one.
pub fn blur_pipeline(blur_stages: usize, constraints: PipelineConstraints) -> Vec<StageSpec> {
    let blur_stages = blur_stages.max(1);
    let mut specs = Vec::with_capacity(blur_stages + 2);
    specs.push(StageSpec::new(CleanupTask::NAME));

    for i in 1..=blur_stages {
        let mut spec = StageSpec::new(BlurTask::NAME).outputs([keys::IMAGE_REF]);
        if blur_stages > 1 {
            spec = spec.labeled(format!("{}-{i}", BlurTask::NAME));
        }
        if constraints.battery_not_low {
            spec = spec.constrained(RequiresBatteryNotLow);
        }
        specs.push(spec);
    }

    let mut save = StageSpec::new(SaveTask::NAME).outputs([keys::FINAL_IMAGE_REFERENCE]);
    if constraints.storage_not_low {
        save = save.constrained(RequiresStorageNotLow);
    }
    if constraints.charging {
        save = save.constrained(RequiresCharging);
    }
    specs.push(save);
    specs
}

/// Chain constants for one blur request.
pub fn blur_input(source_image_reference: impl Into<String>, blur_intensity: u32) -> Data {
    let source: String = source_image_reference.into();
    Data::new()
        .with(keys::SOURCE_IMAGE_REFERENCE, source)
        .with(keys::BLUR_INTENSITY, blur_intensity)
}

pub(crate) fn artifact_error(err: ArtifactError) -> TaskError {
    if err.is_transient() {
        TaskError::transient(err.to_string())
    } else {
        TaskError::permanent(err.to_string())
    }
}

pub(crate) fn codec_error(err: CodecError) -> TaskError {
    TaskError::permanent(err.to_string())
}

/// Sleep for `delay`, waking early (with `Cancelled`) if the chain is cancelled.
pub(crate) async fn pause(ctx: &TaskContext, delay: Duration) -> Result<(), TaskError> {
    if !delay.is_zero() {
        tokio::select! {
            _ = ctx.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
    ctx.checkpoint()
}

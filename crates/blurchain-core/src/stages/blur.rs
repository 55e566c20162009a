//! Blur stage: reads the latest image, blurs it, writes a temporary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{artifact_error, codec_error, pause};
use crate::domain::TaskError;
use crate::ports::{ArtifactStore, Blur, ImageCodec, ImageFormat};
use crate::stages::keys::{OUTPUT_PREFIX, OUTPUT_SCOPE};
use crate::typed::{TaskContext, TypedTask};

#[derive(Debug, Deserialize)]
pub struct BlurInput {
    /// Output of a previous blur stage; wins over the source when present.
    #[serde(rename = "imageRef")]
    pub image_ref: Option<String>,

    #[serde(rename = "sourceImageReference")]
    pub source_image_reference: Option<String>,

    #[serde(rename = "blurIntensity")]
    pub blur_intensity: i64,
}

#[derive(Debug, Serialize)]
pub struct BlurOutput {
    #[serde(rename = "imageRef")]
    pub image_ref: String,
}

pub struct BlurTask {
    artifacts: Arc<dyn ArtifactStore>,
    codec: Arc<dyn ImageCodec>,
    blur: Arc<dyn Blur>,
    delay: Duration,
}

impl BlurTask {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        codec: Arc<dyn ImageCodec>,
        blur: Arc<dyn Blur>,
    ) -> Self {
        Self {
            artifacts,
            codec,
            blur,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TypedTask for BlurTask {
    const NAME: &'static str = "blur";
    type Input = BlurInput;
    type Output = BlurOutput;

    async fn run(&self, ctx: &TaskContext, input: BlurInput) -> Result<BlurOutput, TaskError> {
        let intensity = u32::try_from(input.blur_intensity)
            .ok()
            .filter(|i| *i > 0)
            .ok_or_else(|| {
                TaskError::permanent(format!(
                    "blurIntensity must be a positive integer, got {}",
                    input.blur_intensity
                ))
            })?;
        let uri = input
            .image_ref
            .or(input.source_image_reference)
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| TaskError::permanent("no image reference in input"))?;

        pause(ctx, self.delay).await?;

        let bytes = self.artifacts.read(&uri).await.map_err(artifact_error)?;
        let image = self.codec.decode(&bytes).map_err(codec_error)?;
        ctx.checkpoint()?;

        let blur = Arc::clone(&self.blur);
        let blurred = tokio::task::spawn_blocking(move || blur.apply_blur(&image, intensity))
            .await
            .map_err(|e| TaskError::permanent(format!("blur panicked: {e}")))?;
        ctx.checkpoint()?;

        let encoded = self
            .codec
            .encode(&blurred, ImageFormat::Png)
            .map_err(codec_error)?;
        let image_ref = self
            .artifacts
            .write_temporary(OUTPUT_SCOPE, OUTPUT_PREFIX, encoded)
            .await
            .map_err(artifact_error)?;
        debug!(chain = ctx.chain_name(), stage = ctx.stage_index(), %image_ref, intensity, "image blurred");
        Ok(BlurOutput { image_ref })
    }
}

//! Save stage: persists the latest blurred image with its metadata.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{artifact_error, codec_error, pause};
use crate::domain::TaskError;
use crate::ports::{ArtifactMetadata, ArtifactStore, Clock, ImageCodec, ImageFormat, SystemClock};
use crate::typed::{TaskContext, TypedTask};

/// Display name of saved images.
pub const TITLE: &str = "Blurred Image";

#[derive(Debug, Deserialize)]
pub struct SaveInput {
    #[serde(rename = "imageRef")]
    pub image_ref: String,
}

#[derive(Debug, Serialize)]
pub struct SaveOutput {
    #[serde(rename = "finalImageReference")]
    pub final_image_reference: String,
}

pub struct SaveTask {
    artifacts: Arc<dyn ArtifactStore>,
    codec: Arc<dyn ImageCodec>,
    clock: Arc<dyn Clock>,
    delay: Duration,
}

impl SaveTask {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, codec: Arc<dyn ImageCodec>) -> Self {
        Self {
            artifacts,
            codec,
            clock: Arc::new(SystemClock),
            delay: Duration::ZERO,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn metadata(&self) -> ArtifactMetadata {
        let mut metadata = ArtifactMetadata {
            display_name: TITLE.to_string(),
            description: format!("Image blurred: {TITLE}"),
            mime_type: ImageFormat::Jpeg.mime_type().to_string(),
            ..ArtifactMetadata::default()
        };
        metadata.extra.insert(
            "created_at".to_string(),
            self.clock.now().format("%Y.%m.%d at %H:%M:%S %Z").to_string(),
        );
        metadata
    }
}

#[async_trait]
impl TypedTask for SaveTask {
    const NAME: &'static str = "save";
    type Input = SaveInput;
    type Output = SaveOutput;

    async fn run(&self, ctx: &TaskContext, input: SaveInput) -> Result<SaveOutput, TaskError> {
        pause(ctx, self.delay).await?;

        let bytes = self
            .artifacts
            .read(&input.image_ref)
            .await
            .map_err(artifact_error)?;
        let image = self.codec.decode(&bytes).map_err(codec_error)?;
        let encoded = self
            .codec
            .encode(&image, ImageFormat::Jpeg)
            .map_err(codec_error)?;

        // Last checkpoint: once the write starts the save runs to completion.
        ctx.checkpoint()?;
        let uri = self
            .artifacts
            .write_artifact(encoded, self.metadata())
            .await
            .map_err(artifact_error)?;
        info!(chain = ctx.chain_name(), %uri, "image saved");
        Ok(SaveOutput {
            final_image_reference: uri,
        })
    }
}

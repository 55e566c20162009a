//! Imaging and storage capabilities used by the blur stages.
//!
//! None of these are implemented by the engine; the host plugs in real
//! codecs and storage. `impls` ships small in-memory stand-ins.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decoded image. Pixels are 8-bit grayscale, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RasterImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != (width as usize) * (height as usize) {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed image: {0}")]
    Malformed(String),

    #[error("unsupported format: {0:?}")]
    Unsupported(ImageFormat),
}

pub trait ImageCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<RasterImage, CodecError>;

    fn encode(&self, image: &RasterImage, format: ImageFormat) -> Result<Vec<u8>, CodecError>;
}

pub trait Blur: Send + Sync {
    /// `intensity` is the number of passes; callers guarantee it is positive.
    fn apply_blur(&self, image: &RasterImage, intensity: u32) -> RasterImage;
}

/// Metadata attached to a persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub display_name: String,
    pub description: String,
    pub mime_type: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl ArtifactError {
    /// Whether retrying the same operation might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ArtifactError::Unavailable(_))
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn read(&self, uri: &str) -> Result<Vec<u8>, ArtifactError>;

    /// Write a scratch artifact under `scope`, named `prefix` plus a unique
    /// suffix; returns its URI.
    async fn write_temporary(
        &self,
        scope: &str,
        prefix: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ArtifactError>;

    /// Persist a final artifact; returns its URI.
    async fn write_artifact(
        &self,
        bytes: Vec<u8>,
        metadata: ArtifactMetadata,
    ) -> Result<String, ArtifactError>;

    /// Remove every scratch artifact under `scope`; returns how many were removed.
    async fn delete_temporary_artifacts(&self, scope: &str) -> Result<usize, ArtifactError>;
}

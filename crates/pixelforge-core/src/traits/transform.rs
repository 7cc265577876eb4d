//! Transform executor trait: the pixel-level work is pluggable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;
use crate::types::params::{CompressParams, ConvertParams, CropParams, ResizeParams};

/// What a transform produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformOutput {
    /// Where the output artifact was written.
    pub output_path: PathBuf,
    /// Input size in bytes.
    pub original_size: u64,
    /// Output size in bytes.
    pub output_size: u64,
    /// Output width in pixels, when known.
    pub width: Option<u32>,
    /// Output height in pixels, when known.
    pub height: Option<u32>,
    /// Output format extension, when known.
    pub format: Option<String>,
}

/// Performs image transforms and removes input artifacts.
#[async_trait]
pub trait TransformExecutor: Send + Sync + std::fmt::Debug + 'static {
    /// Re-encode the input at the requested quality.
    async fn compress(&self, input: &Path, params: &CompressParams) -> AppResult<TransformOutput>;

    /// Scale the input.
    async fn resize(&self, input: &Path, params: &ResizeParams) -> AppResult<TransformOutput>;

    /// Change the input's format.
    async fn convert(&self, input: &Path, params: &ConvertParams) -> AppResult<TransformOutput>;

    /// Cut a rectangle out of the input.
    async fn crop(&self, input: &Path, params: &CropParams) -> AppResult<TransformOutput>;

    /// Remove an input artifact. Must succeed when the file is already gone.
    async fn cleanup(&self, path: &Path) -> AppResult<()>;
}

//! Structured job results.

use std::path::Path;

use serde::Serialize;

use pixelforge_core::traits::transform::TransformOutput;
use pixelforge_core::types::operation::OperationType;

/// Result of a single-input transform, as stored on the job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformResult {
    pub success: bool,
    pub operation: OperationType,
    pub output_path: String,
    /// `{download base}/{output file name}`.
    pub download_url: String,
    pub original_size: u64,
    pub output_size: u64,
    /// Percentage of bytes saved, two decimals. Negative when the output grew.
    pub compression_ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl TransformResult {
    /// Build the result for `output`, linking it under `download_base`.
    pub fn new(operation: OperationType, output: &TransformOutput, download_base: &str) -> Self {
        Self {
            success: true,
            operation,
            output_path: output.output_path.to_string_lossy().into_owned(),
            download_url: download_url(download_base, &output.output_path),
            original_size: output.original_size,
            output_size: output.output_size,
            compression_ratio: compression_ratio(output.original_size, output.output_size),
            width: output.width,
            height: output.height,
            format: output.format.clone(),
        }
    }
}

/// One input of a batch that produced an output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub input: String,
    #[serde(flatten)]
    pub result: TransformResult,
}

/// One input of a batch that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub input: String,
    pub error: String,
}

/// Result of a batch job with at least one successful input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub success: bool,
    pub operation: OperationType,
    pub total: usize,
    pub results: Vec<BatchItem>,
    pub failed: Vec<BatchFailure>,
}

/// Download link derived from the output's base name.
pub fn download_url(base: &str, output_path: &Path) -> String {
    let name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}/{}", base.trim_end_matches('/'), name)
}

/// Percentage of bytes saved, rounded to two decimals.
pub fn compression_ratio(original: u64, output: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    let saved = (original as f64 - output as f64) / original as f64 * 100.0;
    (saved * 100.0).round() / 100.0
}

//! Typed operation parameters, parsed from a job payload's `params`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::result::AppResult;
use crate::types::operation::OperationType;

/// Parameters for `compress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressParams {
    /// Encoder quality, 1..=100.
    #[serde(default = "default_quality")]
    pub quality: u8,
}

impl CompressParams {
    /// Reject out-of-range quality values.
    pub fn validate(&self) -> AppResult<()> {
        validate_quality(self.quality)
    }
}

/// How a resize fits the requested box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFit {
    /// Keep aspect ratio, fit inside the box.
    #[default]
    Inside,
    /// Keep aspect ratio, cover the box and crop the overflow.
    Cover,
    /// Stretch to exactly the box.
    Fill,
}

/// Parameters for `resize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeParams {
    /// Target width in pixels.
    #[serde(default)]
    pub width: Option<u32>,
    /// Target height in pixels.
    #[serde(default)]
    pub height: Option<u32>,
    /// Fit mode.
    #[serde(default)]
    pub fit: ResizeFit,
}

impl ResizeParams {
    /// At least one non-zero dimension is required.
    pub fn validate(&self) -> AppResult<()> {
        match (self.width, self.height) {
            (None, None) => Err(AppError::validation(
                "Resize requires a width or a height",
            )),
            (Some(0), _) | (_, Some(0)) => {
                Err(AppError::validation("Resize dimensions must be positive"))
            }
            _ => Ok(()),
        }
    }
}

/// Parameters for `convert`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertParams {
    /// Target format extension (`jpeg`, `png`, `webp`, ...).
    pub format: String,
    /// Encoder quality for lossy targets.
    #[serde(default)]
    pub quality: Option<u8>,
}

impl ConvertParams {
    /// The format must be non-empty; quality, if given, must be in range.
    pub fn validate(&self) -> AppResult<()> {
        if self.format.trim().is_empty() {
            return Err(AppError::validation("Convert requires a target format"));
        }
        self.quality.map_or(Ok(()), validate_quality)
    }
}

/// Parameters for `crop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropParams {
    /// Left edge.
    #[serde(default)]
    pub x: u32,
    /// Top edge.
    #[serde(default)]
    pub y: u32,
    /// Rectangle width.
    pub width: u32,
    /// Rectangle height.
    pub height: u32,
}

impl CropParams {
    /// The rectangle must have an area.
    pub fn validate(&self) -> AppResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(AppError::validation("Crop rectangle must be non-empty"));
        }
        Ok(())
    }
}

/// Parameters for `batch`: the per-file operation and its own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchParams {
    /// Operation applied to every input.
    #[serde(default = "default_batch_operation")]
    pub operation: OperationType,
    /// Parameters for the per-file operation.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl BatchParams {
    /// Nested batches are not allowed.
    pub fn validate(&self) -> AppResult<()> {
        if self.operation == OperationType::Batch {
            return Err(AppError::validation("A batch cannot contain batches"));
        }
        Ok(())
    }

    /// Deserialize the per-file parameters into a typed struct.
    pub fn inner<T: serde::de::DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_value(Value::Object(self.params.clone()))
            .map_err(|e| AppError::validation(format!("Invalid batch parameters: {e}")))
    }
}

fn validate_quality(quality: u8) -> AppResult<()> {
    if (1..=100).contains(&quality) {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "Quality must be between 1 and 100, got {quality}"
        )))
    }
}

fn default_quality() -> u8 {
    80
}

fn default_batch_operation() -> OperationType {
    OperationType::Compress
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compress_defaults_quality() {
        let params: CompressParams = serde_json::from_value(json!({})).unwrap();
        assert_eq!(params.quality, 80);
        assert!(params.validate().is_ok());
        assert!(CompressParams { quality: 0 }.validate().is_err());
    }

    #[test]
    fn test_resize_needs_a_dimension() {
        let params: ResizeParams = serde_json::from_value(json!({"fit": "cover"})).unwrap();
        assert_eq!(params.fit, ResizeFit::Cover);
        assert!(params.validate().is_err());

        let params: ResizeParams = serde_json::from_value(json!({"width": 640})).unwrap();
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_batch_defaults_to_compress_and_keeps_inner_params() {
        let params: BatchParams = serde_json::from_value(json!({"quality": 60})).unwrap();
        assert_eq!(params.operation, OperationType::Compress);
        let inner: CompressParams = params.inner().unwrap();
        assert_eq!(inner.quality, 60);

        let nested: BatchParams = serde_json::from_value(json!({"operation": "batch"})).unwrap();
        assert!(nested.validate().is_err());
    }
}

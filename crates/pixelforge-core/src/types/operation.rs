//! Image operation types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// The fixed set of transform kinds. Each one owns a logical queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Re-encode at a lower quality.
    Compress,
    /// Scale to new dimensions.
    Resize,
    /// Change the container format.
    Convert,
    /// Cut out a rectangle.
    Crop,
    /// Apply one operation to a set of inputs.
    Batch,
}

impl OperationType {
    /// Every operation type, in queue registration order.
    pub const ALL: [OperationType; 5] = [
        Self::Compress,
        Self::Resize,
        Self::Convert,
        Self::Crop,
        Self::Batch,
    ];

    /// Return the operation as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compress => "compress",
            Self::Resize => "resize",
            Self::Convert => "convert",
            Self::Crop => "crop",
            Self::Batch => "batch",
        }
    }

    /// Name of the logical queue that carries this operation.
    pub fn queue_name(&self) -> String {
        format!("image-{}", self.as_str())
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compress" => Ok(Self::Compress),
            "resize" => Ok(Self::Resize),
            "convert" => Ok(Self::Convert),
            "crop" => Ok(Self::Crop),
            "batch" => Ok(Self::Batch),
            other => Err(AppError::validation(format!(
                "Unknown operation type: '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_agree() {
        for op in OperationType::ALL {
            assert_eq!(op.as_str().parse::<OperationType>().unwrap(), op);
        }
        assert!("rotate".parse::<OperationType>().is_err());
    }

    #[test]
    fn test_queue_names_are_distinct() {
        let mut names: Vec<String> = OperationType::ALL.iter().map(|o| o.queue_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), OperationType::ALL.len());
        assert_eq!(OperationType::Compress.queue_name(), "image-compress");
    }
}

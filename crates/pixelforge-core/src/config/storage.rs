//! Output artifact configuration.

use serde::{Deserialize, Serialize};

/// Where transform outputs are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory that receives transform outputs.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "data/output".to_string()
}

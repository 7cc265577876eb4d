//! Collaborator traits defined in `pixelforge-core` and implemented elsewhere.

pub mod settings;
pub mod transform;

pub use settings::{JobSettings, SettingsProvider};
pub use transform::{TransformExecutor, TransformOutput};

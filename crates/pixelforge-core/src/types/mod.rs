//! Core type definitions used across the PixelForge workspace.

pub mod job;
pub mod operation;
pub mod params;

pub use job::{BackendKind, JobOptions, JobOptionsOverride, JobPayload, JobState, JobStatus, QueueCounts};
pub use operation::OperationType;
pub use params::{BatchParams, CompressParams, ConvertParams, CropParams, ResizeFit, ResizeParams};

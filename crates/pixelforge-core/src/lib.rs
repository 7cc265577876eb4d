//! # pixelforge-core
//!
//! Core crate for PixelForge. Contains configuration schemas, the job and
//! operation types shared by the queue and worker crates, the collaborator
//! traits (settings, transforms), and the unified error system.
//!
//! This crate has **no** internal dependencies on other PixelForge crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;

//! Pixel-level transforms for PixelForge.
//!
//! [`ImageTransformExecutor`] implements
//! [`TransformExecutor`](pixelforge_core::traits::TransformExecutor) with the
//! `image` crate. Decoding and encoding run on the blocking thread pool.

pub mod executor;

pub use executor::ImageTransformExecutor;

//! Job execution for PixelForge.
//!
//! This crate provides:
//! - A worker pool that binds one processor per operation type to the queue
//!   gateway and re-binds after backend swaps
//! - Transform processors that call the executor, report progress, and
//!   always clean up inputs
//! - Fire-and-forget webhook delivery of job results

pub mod pool;
pub mod processor;
pub mod result;
pub mod webhook;

pub use pool::WorkerPool;
pub use processor::TransformProcessor;
pub use webhook::WebhookNotifier;

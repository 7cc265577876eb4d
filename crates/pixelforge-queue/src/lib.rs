//! Resilient job submission for PixelForge.
//!
//! This crate provides:
//! - An availability monitor that probes the coordination store with
//!   hysteresis and publishes transitions to registered listeners
//! - Two queue backends behind one tagged union: Redis (distributed) and an
//!   in-process fallback (local)
//! - A queue gateway that swaps every operation's backend atomically when
//!   availability changes, and normalises job status across backends
//! - A polling consumer that executes distributed jobs under a concurrency
//!   ceiling

pub mod availability;
pub mod backend;
pub mod error;
pub mod gateway;
pub mod processor;

pub use availability::{AvailabilityMonitor, ConnectionParams, RedisProbe, StoreProbe};
pub use backend::{
    ConsumerHandle, JobQueue, LOCAL_ID_PREFIX, LocalJobStore, LocalQueue, QueueInstance, RedisQueue,
    spawn_consumer,
};
pub use error::JobExecutionError;
pub use gateway::QueueGateway;
pub use processor::{JobContext, JobProcessor, ProgressSink};

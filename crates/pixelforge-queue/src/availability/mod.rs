//! Coordination store availability.

pub mod monitor;
pub mod probe;
pub mod state;

pub use monitor::{AvailabilityMonitor, StatusListener};
pub use probe::{ConnectionParams, RedisProbe, StoreProbe};
pub use state::AvailabilityState;

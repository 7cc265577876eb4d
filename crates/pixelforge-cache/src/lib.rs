//! # pixelforge-cache
//!
//! Shared-store plumbing for PixelForge:
//!
//! - **redis**: connection establishment against the coordination store,
//!   with bounded timeouts and retry tuning
//! - **keys**: the Redis key layout used by the distributed queue backend
//! - **settings**: job options cached with [moka](https://crates.io/crates/moka)
//!   in front of a [`SettingsProvider`](pixelforge_core::traits::SettingsProvider)

pub mod keys;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod settings;

pub use settings::{OptionsCache, StaticSettingsProvider};

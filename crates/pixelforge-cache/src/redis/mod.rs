//! Redis connection management.

pub mod client;

pub use client::{RedisClient, connection_url, open_client, store_error};

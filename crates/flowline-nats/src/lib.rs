#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

/// Tracing target for NATS client operations.
pub const TRACING_TARGET_CLIENT: &str = "flowline_nats::client";

/// Tracing target for NATS key-value store operations.
pub const TRACING_TARGET_KV: &str = "flowline_nats::kv";

mod cache;
mod client;
mod config;
mod error;

// Re-export async_nats types needed by consumers
pub use async_nats::jetstream;
pub use cache::KvCacheStore;
pub use client::NatsClient;
pub use config::NatsConfig;
pub use error::{Error, Result};

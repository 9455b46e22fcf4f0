//! NATS client wrapper and connection management.
//!
//! The wrapper is cheaply cloneable and thread-safe; clones share one
//! multiplexed TCP connection to the NATS server.

use std::sync::Arc;
use std::time::Duration;

use async_nats::{Client, ConnectOptions, jetstream};

use crate::cache::KvCacheStore;
use crate::config::NatsConfig;
use crate::{Error, Result, TRACING_TARGET_CLIENT};

/// NATS client wrapper with connection management.
#[derive(Debug, Clone)]
pub struct NatsClient {
    inner: Arc<NatsClientInner>,
}

#[derive(Debug)]
struct NatsClientInner {
    client: Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsClient {
    /// Creates a new NATS client and connects.
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        tracing::info!(
            target: TRACING_TARGET_CLIENT,
            servers = %config.nats_url,
            name = config.name(),
            "Connecting to NATS"
        );

        let mut connect_opts = ConnectOptions::new()
            .name(config.name())
            .ping_interval(config.ping_interval())
            .token(config.nats_token.clone());

        if let Some(timeout) = config.connect_timeout() {
            connect_opts = connect_opts.connection_timeout(timeout);
        }
        if let Some(max_reconnects) = config.max_reconnects() {
            connect_opts = connect_opts.max_reconnects(max_reconnects);
        }

        let client = connect_opts
            .connect(config.servers().join(","))
            .await
            .map_err(|e| Error::Connection(Box::new(e)))?;
        let jetstream = jetstream::new(client.clone());

        tracing::info!(
            target: TRACING_TARGET_CLIENT,
            servers = %config.nats_url,
            "Connected to NATS"
        );

        Ok(Self {
            inner: Arc::new(NatsClientInner {
                client,
                jetstream,
                config,
            }),
        })
    }

    /// Returns the underlying NATS client.
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Returns the JetStream context.
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.inner.jetstream
    }

    /// Returns the connection configuration.
    pub fn config(&self) -> &NatsConfig {
        &self.inner.config
    }

    /// Creates the KV-backed validation cache store with the given
    /// entry time-to-live.
    pub async fn validation_cache_store(&self, ttl: Duration) -> Result<KvCacheStore> {
        KvCacheStore::new(&self.inner.jetstream, ttl).await
    }
}

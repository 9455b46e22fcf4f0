//! NATS connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// Default values
const DEFAULT_NAME: &str = "flowline-nats";
const DEFAULT_MAX_RECONNECTS: usize = 10;
const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

/// Configuration for NATS connections with sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL (comma-separated for clustering)
    pub nats_url: String,

    /// Authentication token
    pub nats_token: String,

    /// Client connection name for debugging and monitoring
    pub nats_client_name: Option<String>,

    /// Connection timeout in seconds (optional)
    pub nats_connect_timeout: Option<u64>,

    /// Maximum number of reconnection attempts (0 = unlimited)
    pub nats_max_reconnects: Option<usize>,
}

impl NatsConfig {
    /// Create a new configuration with a single server URL and token.
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            nats_url: server_url.into(),
            nats_token: token.into(),
            nats_client_name: None,
            nats_connect_timeout: None,
            nats_max_reconnects: None,
        }
    }

    /// Returns the client name, using the default if not set.
    #[inline]
    pub fn name(&self) -> &str {
        self.nats_client_name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    /// Returns the server URLs as a vector (splits comma-separated URLs).
    pub fn servers(&self) -> Vec<&str> {
        self.nats_url.split(',').map(str::trim).collect()
    }

    /// Returns the connection timeout as a Duration, if set.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.nats_connect_timeout.map(Duration::from_secs)
    }

    /// Returns the ping interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(DEFAULT_PING_INTERVAL_SECS)
    }

    /// Returns the reconnection attempt cap; `None` means unlimited.
    pub fn max_reconnects(&self) -> Option<usize> {
        match self.nats_max_reconnects {
            Some(0) => None,
            Some(n) => Some(n),
            None => Some(DEFAULT_MAX_RECONNECTS),
        }
    }
}

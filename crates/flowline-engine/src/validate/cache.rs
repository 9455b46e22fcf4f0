//! TTL-based validation result cache.
//!
//! The cache is a capability: callers hold a [`ValidationCache`] and never
//! branch on which backing store is active. The remote store lives in
//! `flowline-nats`; [`MemoryCacheStore`] is the in-process fallback selected
//! when no remote store is available. Store failures are logged and treated
//! as a miss or no-op, so validation correctness never depends on cache
//! health.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::definition::WorkflowId;
use crate::validate::ValidationResult;

/// Tracing target for cache operations.
const TRACING_TARGET: &str = "flowline_engine::cache";

/// Default time-to-live for cached validation results.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Errors surfaced by cache store backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store is unreachable.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    /// The backing store rejected the operation.
    #[error("cache store operation failed: {0}")]
    Backend(String),
}

/// Key-value capability backing the validation cache.
///
/// Values are opaque strings (JSON-serialized results); keys follow the
/// `validation:{workflow_id}:{version}` format.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the value for a key, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores a value under a key with the given time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Removes a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Removes every key starting with the given prefix.
    async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheError>;
}

/// In-process cache store with explicit expiry timestamps.
///
/// Entries are evicted lazily: an expired entry is dropped when read. There
/// is no cross-process consistency in this mode, which is acceptable because
/// cache absence only costs a recompute, never correctness.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCacheStore {
    /// Creates an empty in-process store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheError> {
        self.entries
            .lock()
            .await
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

/// TTL-based result cache keyed by `(workflow id, version)`.
#[derive(Clone)]
pub struct ValidationCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl ValidationCache {
    /// Creates a cache over the given store with the default TTL.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_ttl(store, DEFAULT_TTL)
    }

    /// Creates a cache over the given store with a custom TTL.
    pub fn with_ttl(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Creates a cache backed by the in-process fallback store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()))
    }

    /// Builds the store key for a workflow version.
    pub fn key(workflow_id: WorkflowId, version: i64) -> String {
        format!("validation:{workflow_id}:{version}")
    }

    /// Looks up a cached result.
    ///
    /// Store errors and undecodable payloads are logged and reported as a
    /// miss. A hit is returned with its `cached` flag set.
    pub async fn get(&self, workflow_id: WorkflowId, version: i64) -> Option<ValidationResult> {
        let key = Self::key(workflow_id, version);
        let payload = match self.store.get(&key).await {
            Ok(payload) => payload?,
            Err(error) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    key = %key,
                    error = %error,
                    "Cache read failed, treating as miss"
                );
                return None;
            }
        };

        match serde_json::from_str::<ValidationResult>(&payload) {
            Ok(mut result) => {
                result.cached = true;
                tracing::debug!(target: TRACING_TARGET, key = %key, "Validation cache hit");
                Some(result)
            }
            Err(error) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    key = %key,
                    error = %error,
                    "Cached payload undecodable, treating as miss"
                );
                None
            }
        }
    }

    /// Stores a result. Store errors are logged and swallowed.
    pub async fn set(&self, result: &ValidationResult) {
        let key = Self::key(result.workflow_id, result.version);
        let payload = match serde_json::to_string(result) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    key = %key,
                    error = %error,
                    "Failed to serialize validation result for caching"
                );
                return;
            }
        };

        if let Err(error) = self.store.set(&key, &payload, self.ttl).await {
            tracing::warn!(
                target: TRACING_TARGET,
                key = %key,
                error = %error,
                "Cache write failed, result not cached"
            );
        } else {
            tracing::debug!(
                target: TRACING_TARGET,
                key = %key,
                ttl_secs = self.ttl.as_secs(),
                "Cached validation result"
            );
        }
    }

    /// Invalidates one version, or every version of a workflow when `version`
    /// is `None`.
    pub async fn delete(&self, workflow_id: WorkflowId, version: Option<i64>) {
        let outcome = match version {
            Some(version) => self.store.delete(&Self::key(workflow_id, version)).await,
            None => {
                self.store
                    .delete_prefix(&format!("validation:{workflow_id}:"))
                    .await
            }
        };

        if let Err(error) = outcome {
            tracing::warn!(
                target: TRACING_TARGET,
                workflow_id = %workflow_id,
                error = %error,
                "Cache invalidation failed"
            );
        }
    }
}

impl std::fmt::Debug for ValidationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

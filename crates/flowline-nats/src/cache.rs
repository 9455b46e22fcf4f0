//! JetStream KV implementation of the engine's validation cache store.

use std::time::Duration;

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use flowline_engine::validate::{CacheError, CacheStore};
use futures::StreamExt;

use crate::{Error, Result, TRACING_TARGET_KV};

/// Bucket holding cached validation results.
const BUCKET_NAME: &str = "validation_results";
const BUCKET_DESCRIPTION: &str = "Cached workflow validation results";

/// Validation cache store backed by a JetStream KV bucket.
///
/// Entry expiry is enforced server-side through the bucket's `max_age`, so
/// every engine instance pointed at the same bucket shares one cache. Engine
/// cache keys contain `:`, which NATS KV keys do not allow; keys are mapped
/// to the KV charset on the way in.
#[derive(Debug, Clone)]
pub struct KvCacheStore {
    store: kv::Store,
}

impl KvCacheStore {
    /// Creates or opens the validation results bucket with the given TTL.
    ///
    /// An existing bucket is reused as-is; its configured `max_age` wins over
    /// the requested TTL.
    pub async fn new(jetstream: &jetstream::Context, ttl: Duration) -> Result<Self> {
        let store = match jetstream.get_key_value(BUCKET_NAME).await {
            Ok(store) => {
                tracing::debug!(
                    target: TRACING_TARGET_KV,
                    bucket = BUCKET_NAME,
                    "Using existing KV bucket"
                );
                store
            }
            Err(_) => {
                tracing::debug!(
                    target: TRACING_TARGET_KV,
                    bucket = BUCKET_NAME,
                    ttl_secs = ttl.as_secs(),
                    "Creating new KV bucket"
                );
                jetstream
                    .create_key_value(kv::Config {
                        bucket: BUCKET_NAME.to_string(),
                        description: BUCKET_DESCRIPTION.to_string(),
                        max_age: ttl,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| Error::operation("kv_create", e.to_string()))?
            }
        };

        Ok(Self { store })
    }

    /// Returns the bucket name.
    #[inline]
    pub fn bucket_name(&self) -> &'static str {
        BUCKET_NAME
    }

    async fn kv_keys(&self) -> Result<Vec<String>, CacheError> {
        let mut key_stream = self
            .store
            .keys()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let mut keys = Vec::new();
        while let Some(key_result) = key_stream.next().await {
            match key_result {
                Ok(key) => keys.push(key),
                Err(e) => {
                    tracing::warn!(
                        target: TRACING_TARGET_KV,
                        bucket = BUCKET_NAME,
                        error = %e,
                        "Error reading key from bucket"
                    );
                }
            }
        }
        Ok(keys)
    }
}

/// Maps an engine cache key onto the NATS KV key charset.
fn kv_key(key: &str) -> String {
    key.replace(':', ".")
}

#[async_trait]
impl CacheStore for KvCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let key = kv_key(key);
        let payload = self
            .store
            .get(&key)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        match payload {
            Some(bytes) => {
                tracing::debug!(
                    target: TRACING_TARGET_KV,
                    key = %key,
                    size_bytes = bytes.len(),
                    "Retrieved cached value"
                );
                let value = String::from_utf8(bytes.to_vec())
                    .map_err(|e| CacheError::Backend(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), CacheError> {
        // Expiry is bucket-level (max_age); the per-entry TTL hint is
        // satisfied by the bucket configuration chosen at creation.
        let key = kv_key(key);
        let payload: Vec<u8> = value.as_bytes().to_vec();
        let revision = self
            .store
            .put(&key, payload.into())
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        tracing::debug!(
            target: TRACING_TARGET_KV,
            key = %key,
            revision = revision,
            "Cached value"
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let key = kv_key(key);
        self.store
            .delete(&key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        tracing::debug!(target: TRACING_TARGET_KV, key = %key, "Deleted cached value");
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheError> {
        let prefix = kv_key(prefix);
        let keys = self.kv_keys().await?;
        let mut deleted = 0usize;
        for key in keys.iter().filter(|key| key.starts_with(&prefix)) {
            self.store
                .delete(key)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
            deleted += 1;
        }

        tracing::debug!(
            target: TRACING_TARGET_KV,
            prefix = %prefix,
            deleted = deleted,
            "Deleted cached values by prefix"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_keys_map_to_kv_charset() {
        let mapped = kv_key("validation:0192b1c2-0000-7000-8000-000000000000:3");
        assert_eq!(mapped, "validation.0192b1c2-0000-7000-8000-000000000000.3");
        // Only characters NATS KV accepts remain.
        assert!(
            mapped
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '/' | '_' | '=' | '.'))
        );
    }

    #[test]
    fn test_prefix_mapping_preserves_prefix_relation() {
        let key = kv_key("validation:abc:7");
        let prefix = kv_key("validation:abc:");
        assert!(key.starts_with(&prefix));
    }

    // Integration tests requiring a NATS server live with the deployment
    // harness, not in this crate.
}

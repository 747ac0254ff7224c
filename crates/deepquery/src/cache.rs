// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Content-addressed cache in front of the search providers.
//!
//! Keys are derived from a stable hash of (provider, normalized query,
//! result cap); values are the serialized result lists. The cache is
//! strictly best-effort: a backend error on read is a MISS, a backend
//! error on write is logged and ignored, and a cache constructed without
//! a backend (or whose backend failed at startup) is inert. The pipeline
//! never depends on the cache being available.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::constants::DEFAULT_CACHE_TTL;
use crate::error::Result;
use crate::providers::SearchResult;

/// Storage layer behind [`ProviderCache`]. Implementations are externally
/// synchronized; values are opaque serialized strings.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a raw value. `Ok(None)` on miss.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a raw value with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// Read-through/write-through cache for idempotent provider calls.
#[derive(Clone)]
pub struct ProviderCache {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl: Duration,
}

impl ProviderCache {
    /// Cache over the given backend with the default 24 h TTL.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// An inert cache: `get` always misses, `set` is a no-op.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Override the TTL. A zero TTL disables storing.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Whether a backend is attached.
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Deterministic key for a provider call: a 16-hex-character prefix of
    /// the input hash. Collisions are permitted; a collision simply serves
    /// a possibly-inapplicable entry.
    pub fn cache_key(provider: &str, query: &str, max_results: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(provider.as_bytes());
        hasher.update([0]);
        hasher.update(query.trim().to_lowercase().as_bytes());
        hasher.update([0]);
        hasher.update(max_results.to_le_bytes());
        let digest = hasher.finalize();
        format!("dq:{}:{}", provider, &hex::encode(digest)[..16])
    }

    /// Look up cached results for a provider call. Any cache-layer error
    /// is treated as a MISS.
    pub async fn get(
        &self,
        provider: &str,
        query: &str,
        max_results: usize,
    ) -> Option<Vec<SearchResult>> {
        let backend = self.backend.as_ref()?;
        let key = Self::cache_key(provider, query, max_results);

        let raw = match backend.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(provider, key = %key, error = %e, "cache read failed; treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<Vec<SearchResult>>(&raw) {
            Ok(results) => {
                tracing::debug!(provider, key = %key, count = results.len(), "cache hit");
                Some(results)
            }
            Err(e) => {
                tracing::warn!(provider, key = %key, error = %e, "cache entry undecodable; treating as miss");
                None
            }
        }
    }

    /// Store results for a provider call. Errors are logged and swallowed;
    /// a zero TTL skips the write entirely.
    pub async fn set(
        &self,
        provider: &str,
        query: &str,
        max_results: usize,
        results: &[SearchResult],
    ) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        if self.ttl.is_zero() {
            return;
        }
        let key = Self::cache_key(provider, query, max_results);
        let raw = match serde_json::to_string(results) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(provider, error = %e, "failed to serialize results for cache");
                return;
            }
        };
        if let Err(e) = backend.set(&key, &raw, self.ttl).await {
            tracing::warn!(provider, key = %key, error = %e, "cache write failed");
        }
    }
}

/// In-process cache backend with instant-based expiry. Used by tests and
/// single-node deployments without Redis.
#[derive(Default)]
pub struct InMemoryCacheBackend {
    entries: dashmap::DashMap<String, (String, std::time::Instant)>,
}

impl InMemoryCacheBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key) {
            Some(entry) => {
                let (value, expires_at) = entry.value();
                if std::time::Instant::now() >= *expires_at {
                    drop(entry);
                    self.entries.remove(key);
                    Ok(None)
                } else {
                    Ok(Some(value.clone()))
                }
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            (value.to_string(), std::time::Instant::now() + ttl),
        );
        Ok(())
    }
}

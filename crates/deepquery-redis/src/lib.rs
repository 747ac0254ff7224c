//! # Redis Integration
//!
//! Two pieces of the pipeline's plumbing live on Redis in multi-process
//! deployments:
//!
//! - [`RedisCacheBackend`] - provider-response cache storage
//!   (`SETEX`/`GET`) behind [`deepquery::cache::ProviderCache`].
//! - [`RedisBus`] - the cross-process progress channel
//!   (`PUBLISH`/`SUBSCRIBE` on `progress:{session_id}`) behind
//!   [`deepquery::progress::ProgressBus`].
//!
//! Both degrade gracefully: when the connection cannot be established at
//! startup, build the cache with `ProviderCache::disabled()` and the bus
//! with `ProgressBus::new()` - the pipeline runs identically, just
//! without sharing.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deepquery::cache::ProviderCache;
//! use deepquery::progress::ProgressBus;
//! use deepquery_redis::{RedisBus, RedisCacheBackend};
//!
//! # tokio_test::block_on(async {
//! let cache = match RedisCacheBackend::connect("redis://127.0.0.1/").await {
//!     Ok(backend) => ProviderCache::new(Arc::new(backend)),
//!     Err(_) => ProviderCache::disabled(),
//! };
//! let bus = match RedisBus::connect("redis://127.0.0.1/").await {
//!     Ok(remote) => ProgressBus::with_remote(Arc::new(remote)),
//!     Err(_) => ProgressBus::new(),
//! };
//! # let _ = (cache, bus);
//! # });
//! ```

use std::time::Duration;

use async_trait::async_trait;
use deepquery::cache::CacheBackend;
use deepquery::progress::RemoteBus;
use deepquery::{Error, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::AsyncCommands;

/// Redis-backed storage for the provider-response cache.
#[derive(Clone)]
pub struct RedisCacheBackend {
    manager: redis::aio::ConnectionManager,
}

impl RedisCacheBackend {
    /// Connect to Redis and verify the connection with a PING.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::store(format!("invalid redis url: {e}")))?;
        let mut manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::store(format!("redis connection failed: {e}")))?;
        redis::cmd("PING")
            .query_async::<()>(&mut manager)
            .await
            .map_err(|e| Error::store(format!("redis ping failed: {e}")))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut connection = self.manager.clone();
        connection
            .get(key)
            .await
            .map_err(|e| Error::store(format!("redis GET failed: {e}")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut connection = self.manager.clone();
        connection
            .set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(|e| Error::store(format!("redis SETEX failed: {e}")))
    }
}

/// Redis pub/sub as the cross-process progress channel.
pub struct RedisBus {
    client: redis::Client,
    manager: redis::aio::ConnectionManager,
}

impl RedisBus {
    /// Connect to Redis for publishing and subscribing.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::store(format!("invalid redis url: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::store(format!("redis connection failed: {e}")))?;
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl RemoteBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut connection = self.manager.clone();
        connection
            .publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| Error::store(format!("redis PUBLISH failed: {e}")))
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::store(format!("redis pubsub connection failed: {e}")))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| Error::store(format!("redis SUBSCRIBE failed: {e}")))?;

        let channel = channel.to_string();
        let stream = pubsub
            .into_on_message()
            .filter_map(move |message| {
                let channel = channel.clone();
                async move {
                    match message.get_payload::<String>() {
                        Ok(payload) => Some(payload),
                        Err(e) => {
                            tracing::warn!(channel = %channel, error = %e, "undecodable pubsub payload");
                            None
                        }
                    }
                }
            })
            .boxed();
        Ok(stream)
    }
}

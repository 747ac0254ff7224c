// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Parallel provider fan-out.
//!
//! One query is issued to every registered provider concurrently. Each
//! call goes through the provider cache first, runs under its own
//! timeout, and is isolated: a provider failure contributes an empty
//! list, never an error. The returned map always contains every
//! registered provider key, and an optional completion callback fires
//! exactly once per provider with a monotonically advancing completed
//! count. No ordering is guaranteed among providers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::cache::ProviderCache;
use crate::cancel::CancelToken;
use crate::constants::DEFAULT_PROVIDER_TIMEOUT;
use crate::providers::{ProviderSet, SearchProvider, SearchResult};

/// Per-provider completion callback:
/// `(provider_name, result_count, completed_count, total_providers)`.
pub type FanoutCallback = Arc<dyn Fn(&str, usize, usize, usize) + Send + Sync>;

/// Executes one query against every registered provider in parallel.
#[derive(Clone)]
pub struct SearchFanout {
    providers: ProviderSet,
    cache: ProviderCache,
    provider_timeout: Duration,
}

impl SearchFanout {
    /// Fan-out over the given providers and cache with the default 30 s
    /// per-provider timeout.
    pub fn new(providers: ProviderSet, cache: ProviderCache) -> Self {
        Self {
            providers,
            cache,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Override the per-provider timeout.
    #[must_use]
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Names of the registered providers.
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.names()
    }

    /// Issue `query` to every provider, returning a map with one entry
    /// per registered provider (empty list on failure, timeout or
    /// cancellation).
    pub async fn search_all(
        &self,
        query: &str,
        max_results_per_provider: usize,
        cancel: &CancelToken,
        on_done: Option<FanoutCallback>,
    ) -> HashMap<String, Vec<SearchResult>> {
        let total = self.providers.len();
        let completed = Arc::new(AtomicUsize::new(0));

        let calls = self.providers.providers().iter().map(|provider| {
            let provider = Arc::clone(provider);
            let completed = Arc::clone(&completed);
            let on_done = on_done.clone();
            let cancel = cancel.clone();
            async move {
                let name = provider.name();
                let results = self
                    .search_one(provider.as_ref(), query, max_results_per_provider, &cancel)
                    .await;

                // Exactly one completion report per provider, after the
                // call has either produced results or failed.
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(callback) = on_done.as_ref() {
                    callback(name, results.len(), done, total);
                }
                (name.to_string(), results)
            }
        });

        join_all(calls).await.into_iter().collect()
    }

    /// One provider call: cache read-through, timeout, failure isolation.
    async fn search_one(
        &self,
        provider: &dyn SearchProvider,
        query: &str,
        max_results: usize,
        cancel: &CancelToken,
    ) -> Vec<SearchResult> {
        let name = provider.name();

        if cancel.is_cancelled() {
            return Vec::new();
        }

        if let Some(cached) = self.cache.get(name, query, max_results).await {
            return cached;
        }

        let call = tokio::time::timeout(self.provider_timeout, provider.search(query, max_results));
        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(provider = name, "provider call aborted by cancellation");
                return Vec::new();
            }
            outcome = call => outcome,
        };

        let results = match outcome {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                tracing::warn!(provider = name, error = %e, "provider search failed");
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!(
                    provider = name,
                    timeout = ?self.provider_timeout,
                    "provider search timed out"
                );
                return Vec::new();
            }
        };

        // Zero-results audit: a configured provider returning nothing is
        // worth a warning; an unconfigured one is expected to be silent.
        if results.is_empty() {
            if provider.is_configured() {
                tracing::warn!(provider = name, query, "configured provider returned zero results");
            }
            return results;
        }

        self.cache.set(name, query, max_results, &results).await;
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryCacheBackend, ProviderCache};
    use crate::models::SourceType;
    use crate::testing::MockSearchProvider;
    use parking_lot::Mutex;

    fn fanout_with(providers: ProviderSet) -> SearchFanout {
        let cache = ProviderCache::new(Arc::new(InMemoryCacheBackend::new()));
        SearchFanout::new(providers, cache)
    }

    #[tokio::test]
    async fn test_every_provider_key_present() {
        let providers = ProviderSet::new()
            .with(Arc::new(
                MockSearchProvider::named("serpapi", SourceType::Web).with_result_count(3),
            ))
            .with(Arc::new(
                MockSearchProvider::named("arxiv", SourceType::Academic).failing(),
            ))
            .with(Arc::new(
                MockSearchProvider::named("wikipedia", SourceType::Encyclopedia).with_result_count(0),
            ));
        let fanout = fanout_with(providers);
        let cancel = CancelToken::new();

        let map = fanout.search_all("q", 5, &cancel, None).await;
        assert_eq!(map.len(), 3);
        assert_eq!(map["serpapi"].len(), 3);
        assert!(map["arxiv"].is_empty(), "failure is isolated to an empty list");
        assert!(map["wikipedia"].is_empty());
    }

    #[tokio::test]
    async fn test_callback_fires_once_per_provider() {
        let providers = ProviderSet::new()
            .with(Arc::new(
                MockSearchProvider::named("serpapi", SourceType::Web).with_result_count(2),
            ))
            .with(Arc::new(
                MockSearchProvider::named("newsapi", SourceType::News).failing(),
            ));
        let fanout = fanout_with(providers);
        let cancel = CancelToken::new();

        let seen: Arc<Mutex<Vec<(String, usize, usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let callback: FanoutCallback = Arc::new(move |name, count, done, total| {
            seen_cb.lock().push((name.to_string(), count, done, total));
        });

        fanout.search_all("q", 5, &cancel, Some(callback)).await;

        let calls = seen.lock();
        assert_eq!(calls.len(), 2);
        // completedCount advances monotonically to total; order of
        // providers is not defined.
        let mut dones: Vec<usize> = calls.iter().map(|c| c.2).collect();
        dones.sort_unstable();
        assert_eq!(dones, vec![1, 2]);
        assert!(calls.iter().all(|c| c.3 == 2));
    }

    #[tokio::test]
    async fn test_slow_provider_does_not_block_others() {
        let providers = ProviderSet::new()
            .with(Arc::new(
                MockSearchProvider::named("serpapi", SourceType::Web).with_result_count(4),
            ))
            .with(Arc::new(
                MockSearchProvider::named("pubmed", SourceType::Academic)
                    .with_delay(Duration::from_secs(30)),
            ));
        let fanout = fanout_with(providers).with_provider_timeout(Duration::from_millis(50));
        let cancel = CancelToken::new();

        let map = fanout.search_all("q", 5, &cancel, None).await;
        assert_eq!(map["serpapi"].len(), 4);
        assert!(map["pubmed"].is_empty(), "timed-out provider yields empty list");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        let provider = Arc::new(
            MockSearchProvider::named("serpapi", SourceType::Web).with_result_count(2),
        );
        let providers = ProviderSet::new().with(Arc::clone(&provider) as _);
        let fanout = fanout_with(providers);
        let cancel = CancelToken::new();

        fanout.search_all("q", 5, &cancel, None).await;
        fanout.search_all("q", 5, &cancel, None).await;
        assert_eq!(provider.call_count(), 1, "second call must be served from cache");
    }

    #[tokio::test]
    async fn test_cancelled_fanout_returns_empty() {
        let providers = ProviderSet::new().with(Arc::new(
            MockSearchProvider::named("serpapi", SourceType::Web).with_result_count(2),
        ));
        let fanout = fanout_with(providers);
        let cancel = CancelToken::new();
        cancel.cancel();

        let map = fanout.search_all("q", 5, &cancel, None).await;
        assert!(map["serpapi"].is_empty());
    }
}

// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The search-provider seam.
//!
//! Five logical providers feed the retrieval stage: web, news, two
//! academic sources and an encyclopedia. Implementations live in the
//! integration crates (`deepquery-serpapi`, `deepquery-newsapi`,
//! `deepquery-arxiv`, `deepquery-pubmed`, `deepquery-wikipedia`); the
//! fan-out in [`crate::fanout`] treats them uniformly through
//! [`SearchProvider`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Source, SourceType};

/// One candidate document returned by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Document title.
    pub title: String,
    /// Document URL.
    pub url: String,
    /// Short excerpt or abstract.
    pub snippet: String,
    /// Source category.
    pub source_type: SourceType,
    /// Name of the provider that produced this result.
    pub provider: String,
    /// Author, when the provider exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Publication date string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    /// Provider-specific metadata blob.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl SearchResult {
    /// Convert into a persistable [`Source`] with a neutral credibility
    /// score; the verify stage refines the score later.
    pub fn into_source(self) -> Source {
        Source {
            title: self.title,
            url: self.url,
            snippet: self.snippet,
            provider: self.provider,
            source_type: self.source_type,
            author: self.author,
            published_at: self.published_at,
            credibility_score: 0.5,
            metadata: self.metadata,
        }
    }
}

/// An external search API contributing candidate sources.
///
/// Implementations must be cheap to call concurrently. A provider that is
/// not configured (missing credentials) should return `false` from
/// [`SearchProvider::is_configured`] and an empty list from search; the
/// fan-out will not record audit warnings for it.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Stable provider name ("serpapi", "newsapi", "arxiv", "pubmed",
    /// "wikipedia").
    fn name(&self) -> &'static str;

    /// The source category this provider contributes.
    fn kind(&self) -> SourceType;

    /// Whether credentials for this provider are present. Keyless
    /// providers are always configured.
    fn is_configured(&self) -> bool {
        true
    }

    /// Execute one query, returning up to `max_results` results.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

/// The set of providers participating in a fan-out.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: Vec<Arc<dyn SearchProvider>>,
}

impl ProviderSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider.
    #[must_use]
    pub fn with(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Registered providers.
    pub fn providers(&self) -> &[Arc<dyn SearchProvider>] {
        &self.providers
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Provider names, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSearchProvider;

    #[test]
    fn test_into_source_neutral_credibility() {
        let result = SearchResult {
            title: "T".to_string(),
            url: "https://a.example".to_string(),
            snippet: "s".to_string(),
            source_type: SourceType::Academic,
            provider: "arxiv".to_string(),
            author: Some("Doe".to_string()),
            published_at: None,
            metadata: serde_json::Value::Null,
        };
        let source = result.into_source();
        assert!((source.credibility_score - 0.5).abs() < f64::EPSILON);
        assert_eq!(source.source_type, SourceType::Academic);
    }

    #[test]
    fn test_provider_set() {
        let set = ProviderSet::new()
            .with(Arc::new(MockSearchProvider::named("serpapi", SourceType::Web)))
            .with(Arc::new(MockSearchProvider::named("arxiv", SourceType::Academic)));
        assert_eq!(set.len(), 2);
        assert!(!set.is_empty());
        assert_eq!(set.names(), vec!["serpapi", "arxiv"]);
    }
}

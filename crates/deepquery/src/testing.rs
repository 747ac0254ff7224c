// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Test doubles for the pipeline's external seams.
//!
//! [`MockLanguageModel`] answers prompts from substring-matched rules,
//! [`MockSearchProvider`] fabricates deterministic results, and
//! [`context_with_llm`] wires an [`crate::agents::AgentContext`] over a
//! fresh in-memory store. Used by this crate's unit and integration
//! tests; exported so downstream crates can test against the same seams.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::agents::{AgentContext, NullProgressSink};
use crate::cancel::CancelToken;
use crate::config::ResearchConfig;
use crate::error::{Error, Result};
use crate::llm::{GenerateRequest, LanguageModel};
use crate::models::{ResearchParams, Session, SourceType};
use crate::providers::{SearchProvider, SearchResult};
use crate::store::{MemoryStore, ResearchStore};

/// A scripted language model.
///
/// Rules are checked in insertion order against the prompt; the first
/// substring match wins. Without a matching rule the default reply is
/// returned. `failing()` makes every call error.
#[derive(Default)]
pub struct MockLanguageModel {
    rules: Mutex<Vec<(String, String)>>,
    default_reply: Mutex<String>,
    fail: bool,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    /// A model that answers every prompt with an empty string.
    pub fn new() -> Self {
        Self::default()
    }

    /// A model whose every call fails with an LLM error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Set the default reply.
    #[must_use]
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        *self.default_reply.lock() = reply.into();
        self
    }

    /// Add a substring-matched rule.
    #[must_use]
    pub fn with_rule(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.lock().push((needle.into(), reply.into()));
        self
    }

    /// Number of generate calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts seen so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.clone());
        if self.fail {
            return Err(Error::llm("mock llm failure"));
        }
        let rules = self.rules.lock();
        for (needle, reply) in rules.iter() {
            if request.prompt.contains(needle) {
                return Ok(reply.clone());
            }
        }
        Ok(self.default_reply.lock().clone())
    }
}

/// A deterministic search provider.
pub struct MockSearchProvider {
    name: &'static str,
    kind: SourceType,
    result_count: usize,
    delay: Option<Duration>,
    fail: bool,
    configured: bool,
    calls: AtomicUsize,
}

impl MockSearchProvider {
    /// Provider returning 5 results per query.
    pub fn named(name: &'static str, kind: SourceType) -> Self {
        Self {
            name,
            kind,
            result_count: 5,
            delay: None,
            fail: false,
            configured: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fix the number of results per call.
    #[must_use]
    pub fn with_result_count(mut self, count: usize) -> Self {
        self.result_count = count;
        self
    }

    /// Sleep before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call errors.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Mark the provider unconfigured (missing credentials).
    #[must_use]
    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    /// Number of search calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> SourceType {
        self.kind
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(Error::provider(self.name, "mock provider failure"));
        }

        // URLs are unique per (provider, query, index) so dedup keeps
        // results from distinct queries apart.
        let slug: String = query
            .chars()
            .filter(|c| c.is_alphanumeric())
            .take(24)
            .collect();
        Ok((0..self.result_count.min(max_results))
            .map(|index| SearchResult {
                title: format!("{} result {index} for {query}", self.name),
                url: format!("https://{}.example/{slug}/{index}", self.name),
                snippet: format!("Snippet about {query} from {}", self.name),
                source_type: self.kind,
                provider: self.name.to_string(),
                author: None,
                published_at: Some("2026-01-15".to_string()),
                metadata: serde_json::Value::Null,
            })
            .collect())
    }
}

/// Build an [`AgentContext`] over a fresh [`MemoryStore`] seeded with one
/// session whose id is `"s-test"`.
pub async fn context_with_llm(query: &str, llm: MockLanguageModel) -> AgentContext {
    context_with(query, ResearchParams::default(), llm).await
}

/// Like [`context_with_llm`] but with explicit parameters.
pub async fn context_with(
    query: &str,
    params: ResearchParams,
    llm: MockLanguageModel,
) -> AgentContext {
    let store: Arc<dyn ResearchStore> = Arc::new(MemoryStore::new());
    let session = Session::new("s-test", query, params.clone());
    store
        .session_insert(session)
        .await
        .unwrap_or_else(|e| panic!("seed session: {e}"));

    AgentContext {
        session_id: "s-test".to_string(),
        query: query.to_string(),
        effective_query: query.to_string(),
        search_hint: None,
        params,
        store,
        llm: Arc::new(llm),
        config: ResearchConfig::default(),
        cancel: CancelToken::new(),
        progress: Arc::new(NullProgressSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_llm_rules_win_over_default() {
        let llm = MockLanguageModel::new()
            .with_reply("default")
            .with_rule("title", "Great Title");

        let by_rule = llm
            .generate(GenerateRequest::new("produce a title please", "m"))
            .await
            .unwrap();
        assert_eq!(by_rule, "Great Title");

        let by_default = llm
            .generate(GenerateRequest::new("anything else", "m"))
            .await
            .unwrap();
        assert_eq!(by_default, "default");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_llm_failing() {
        let llm = MockLanguageModel::failing();
        assert!(llm.generate(GenerateRequest::new("x", "m")).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_provider_results() {
        let provider = MockSearchProvider::named("serpapi", SourceType::Web).with_result_count(3);
        let results = provider.search("battery recycling", 10).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].url.starts_with("https://serpapi.example/"));
        assert_eq!(provider.call_count(), 1);

        // Caps at max_results.
        let capped = provider.search("battery recycling", 2).await.unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_provider_distinct_urls_per_query() {
        let provider = MockSearchProvider::named("serpapi", SourceType::Web).with_result_count(1);
        let a = provider.search("query one", 5).await.unwrap();
        let b = provider.search("query two", 5).await.unwrap();
        assert_ne!(a[0].url, b[0].url);
    }
}

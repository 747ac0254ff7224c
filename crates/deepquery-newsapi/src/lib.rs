//! # NewsAPI News Search Provider
//!
//! NewsAPI's `/v2/everything` endpoint indexes articles from tens of
//! thousands of outlets. This crate contributes the pipeline's news
//! results, restricted to the last 30 days so stale coverage does not
//! crowd out current reporting.
//!
//! ## Features
//!
//! - Relevancy-sorted article search with author and publication date
//! - 30-day recency window
//! - Unconfigured (no API key) degrades to an empty, silent provider
//!
//! ## Usage
//!
//! ```rust,no_run
//! use deepquery_newsapi::NewsApiProvider;
//! use deepquery::providers::SearchProvider;
//!
//! # tokio_test::block_on(async {
//! let newsapi = NewsApiProvider::new("YOUR_API_KEY");
//! let results = newsapi.search("battery recycling", 20).await.unwrap();
//! println!("found {} articles", results.len());
//! # });
//! ```

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use deepquery::models::SourceType;
use deepquery::providers::{SearchProvider, SearchResult};
use deepquery::{Error, Result, DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use serde_json::{json, Value};

const SEARCH_ENDPOINT: &str = "https://newsapi.org/v2/everything";

/// NewsAPI caps `pageSize` at 100.
const MAX_PAGE_SIZE: usize = 100;

/// Articles older than this are excluded.
const RECENCY_DAYS: i64 = 30;

/// NewsAPI-backed news provider.
pub struct NewsApiProvider {
    api_key: String,
    language: String,
    client: reqwest::Client,
}

// Custom Debug implementation to prevent API key exposure in logs
impl std::fmt::Debug for NewsApiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsApiProvider")
            .field("api_key", &"[REDACTED]")
            .field("language", &self.language)
            .finish()
    }
}

impl NewsApiProvider {
    /// Create a provider with the given API key, searching English
    /// articles.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            language: "en".to_string(),
            client: create_http_client(),
        }
    }

    /// Create a provider from the `NEWSAPI_KEY` environment variable; the
    /// provider reports itself unconfigured when the key is absent.
    pub fn from_env() -> Self {
        Self::new(std::env::var("NEWSAPI_KEY").unwrap_or_default())
    }

    /// Set the article language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Parse a NewsAPI response body into results.
    fn parse_response(data: &Value, max_results: usize) -> Vec<SearchResult> {
        let Some(articles) = data["articles"].as_array() else {
            return Vec::new();
        };
        articles
            .iter()
            .take(max_results)
            .map(|article| SearchResult {
                title: article["title"].as_str().unwrap_or("").to_string(),
                url: article["url"].as_str().unwrap_or("").to_string(),
                snippet: article["description"].as_str().unwrap_or("").to_string(),
                source_type: SourceType::News,
                provider: "newsapi".to_string(),
                author: article["author"].as_str().map(ToString::to_string),
                published_at: article["publishedAt"].as_str().map(ToString::to_string),
                metadata: json!({
                    "source_name": article["source"]["name"].as_str().unwrap_or(""),
                    "content": article["content"].as_str().unwrap_or(""),
                }),
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for NewsApiProvider {
    fn name(&self) -> &'static str {
        "newsapi"
    }

    fn kind(&self) -> SourceType {
        SourceType::News
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        if !self.is_configured() {
            return Ok(Vec::new());
        }

        let from_date = (Utc::now() - ChronoDuration::days(RECENCY_DAYS))
            .format("%Y-%m-%d")
            .to_string();

        let response = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[
                ("q", query),
                ("language", self.language.as_str()),
                ("sortBy", "relevancy"),
                ("pageSize", &max_results.min(MAX_PAGE_SIZE).to_string()),
                ("from", &from_date),
                ("apiKey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::provider("newsapi", format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::provider("newsapi", format!("status {status}")));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::provider("newsapi", format!("undecodable response: {e}")))?;

        let results = Self::parse_response(&data, max_results);
        tracing::debug!(count = results.len(), "newsapi search complete");
        Ok(results)
    }
}

/// Create an HTTP client with standard timeouts
fn create_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_HTTP_REQUEST_TIMEOUT)
        .connect_timeout(DEFAULT_HTTP_CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

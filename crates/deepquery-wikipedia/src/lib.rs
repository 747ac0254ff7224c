//! # Wikipedia Encyclopedia Search Provider
//!
//! Wikipedia is the free encyclopedia containing millions of articles on
//! diverse topics. This crate contributes the pipeline's encyclopedia
//! results: a MediaWiki full-text search followed by a REST summary
//! lookup per page. No key required.
//!
//! ## Features
//!
//! - Full-text article search
//! - Page summaries with canonical desktop URLs
//! - Configurable result count
//! - No API key required (uses the public Wikipedia API)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use deepquery_wikipedia::WikipediaProvider;
//! use deepquery::providers::SearchProvider;
//!
//! # tokio_test::block_on(async {
//! let wikipedia = WikipediaProvider::new();
//! let results = wikipedia.search("battery recycling", 5).await.unwrap();
//! println!("found {} articles", results.len());
//! # });
//! ```

use async_trait::async_trait;
use deepquery::models::SourceType;
use deepquery::providers::{SearchProvider, SearchResult};
use deepquery::{Error, Result, DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use serde_json::{json, Value};

const ACTION_API: &str = "https://en.wikipedia.org/w/api.php";
const REST_API: &str = "https://en.wikipedia.org/api/rest_v1";

/// Wikipedia returns at most this many search hits per request.
const MAX_SEARCH_LIMIT: usize = 50;

/// Wikipedia-backed encyclopedia provider.
#[derive(Debug, Clone, Default)]
pub struct WikipediaProvider;

impl WikipediaProvider {
    /// Create the provider. No credentials are needed.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Titles from a MediaWiki search body.
    pub fn parse_search_titles(data: &Value) -> Vec<String> {
        data["query"]["search"]
            .as_array()
            .map(|pages| {
                pages
                    .iter()
                    .filter_map(|page| page["title"].as_str())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// One result from a REST summary body; `None` when the summary has
    /// no canonical page URL.
    pub fn parse_summary(data: &Value, fallback_title: &str) -> Option<SearchResult> {
        let url = data["content_urls"]["desktop"]["page"].as_str()?;
        Some(SearchResult {
            title: data["title"].as_str().unwrap_or(fallback_title).to_string(),
            url: url.to_string(),
            snippet: data["extract"].as_str().unwrap_or("").to_string(),
            source_type: SourceType::Encyclopedia,
            provider: "wikipedia".to_string(),
            author: None,
            published_at: None,
            metadata: json!({
                "description": data["description"].as_str().unwrap_or(""),
            }),
        })
    }
}

#[async_trait]
impl SearchProvider for WikipediaProvider {
    fn name(&self) -> &'static str {
        "wikipedia"
    }

    fn kind(&self) -> SourceType {
        SourceType::Encyclopedia
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let client = create_http_client();

        let search_response = client
            .get(ACTION_API)
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", &max_results.min(MAX_SEARCH_LIMIT).to_string()),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| Error::provider("wikipedia", format!("search failed: {e}")))?;

        if !search_response.status().is_success() {
            let status = search_response.status();
            return Err(Error::provider("wikipedia", format!("search status {status}")));
        }

        let search_data: Value = search_response
            .json()
            .await
            .map_err(|e| Error::provider("wikipedia", format!("undecodable search body: {e}")))?;

        let mut results = Vec::new();
        for title in Self::parse_search_titles(&search_data) {
            let summary_response = client
                .get(format!(
                    "{REST_API}/page/summary/{}",
                    urlencoding::encode(&title)
                ))
                .send()
                .await;

            // A missing summary drops one page, not the whole search.
            let Ok(summary_response) = summary_response else {
                continue;
            };
            if !summary_response.status().is_success() {
                continue;
            }
            let Ok(summary_data) = summary_response.json::<Value>().await else {
                continue;
            };
            if let Some(result) = Self::parse_summary(&summary_data, &title) {
                results.push(result);
            }
            if results.len() >= max_results {
                break;
            }
        }

        tracing::debug!(count = results.len(), "wikipedia search complete");
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

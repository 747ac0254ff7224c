//! # SerpAPI Web Search Provider
//!
//! SerpAPI proxies Google search results through a stable JSON API. This
//! crate contributes the pipeline's general-web results: organic hits
//! plus the knowledge-graph panel when one is present.
//!
//! ## Features
//!
//! - Organic Google results with title, URL and snippet
//! - Knowledge-graph entry surfaced as the first result
//! - Unconfigured (no API key) degrades to an empty, silent provider
//!
//! ## Usage
//!
//! ```rust,no_run
//! use deepquery_serpapi::SerpApiProvider;
//! use deepquery::providers::SearchProvider;
//!
//! # tokio_test::block_on(async {
//! let serpapi = SerpApiProvider::new("YOUR_API_KEY");
//! let results = serpapi.search("battery recycling", 10).await.unwrap();
//! println!("found {} results", results.len());
//! # });
//! ```

use async_trait::async_trait;
use deepquery::models::SourceType;
use deepquery::providers::{SearchProvider, SearchResult};
use deepquery::{Error, Result, DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use serde_json::{json, Value};

const SEARCH_ENDPOINT: &str = "https://serpapi.com/search";

/// SerpAPI caps `num` at 100 per request.
const MAX_PER_REQUEST: usize = 100;

/// SerpAPI-backed web search provider.
pub struct SerpApiProvider {
    api_key: String,
    client: reqwest::Client,
}

// Custom Debug implementation to prevent API key exposure in logs
impl std::fmt::Debug for SerpApiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerpApiProvider")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl SerpApiProvider {
    /// Create a provider with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: create_http_client(),
        }
    }

    /// Create a provider from the `SERPAPI_KEY` environment variable; the
    /// provider reports itself unconfigured when the key is absent.
    pub fn from_env() -> Self {
        Self::new(std::env::var("SERPAPI_KEY").unwrap_or_default())
    }

    /// Parse a SerpAPI response body into results. The knowledge graph,
    /// when present with a URL, leads the list.
    fn parse_response(data: &Value, max_results: usize) -> Vec<SearchResult> {
        let mut results = Vec::new();

        if let Some(graph) = data.get("knowledge_graph") {
            let url = graph["website"]
                .as_str()
                .or_else(|| graph["source"]["link"].as_str())
                .unwrap_or("");
            if !url.is_empty() {
                results.push(SearchResult {
                    title: graph["title"].as_str().unwrap_or("Knowledge Graph Result").to_string(),
                    url: url.to_string(),
                    snippet: graph["description"].as_str().unwrap_or("").to_string(),
                    source_type: SourceType::Web,
                    provider: "serpapi".to_string(),
                    author: None,
                    published_at: None,
                    metadata: json!({"kind": "knowledge_graph"}),
                });
            }
        }

        if let Some(organic) = data["organic_results"].as_array() {
            for item in organic {
                results.push(SearchResult {
                    title: item["title"].as_str().unwrap_or("").to_string(),
                    url: item["link"].as_str().unwrap_or("").to_string(),
                    snippet: item["snippet"].as_str().unwrap_or("").to_string(),
                    source_type: SourceType::Web,
                    provider: "serpapi".to_string(),
                    author: None,
                    published_at: None,
                    metadata: json!({
                        "displayed_link": item["displayed_link"].as_str().unwrap_or(""),
                    }),
                });
            }
        }

        results.truncate(max_results);
        results
    }
}

#[async_trait]
impl SearchProvider for SerpApiProvider {
    fn name(&self) -> &'static str {
        "serpapi"
    }

    fn kind(&self) -> SourceType {
        SourceType::Web
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        if !self.is_configured() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("engine", "google"),
                ("q", query),
                ("num", &max_results.min(MAX_PER_REQUEST).to_string()),
                ("hl", "en"),
                ("gl", "us"),
            ])
            .send()
            .await
            .map_err(|e| Error::provider("serpapi", format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::provider("serpapi", format!("status {status}")));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::provider("serpapi", format!("undecodable response: {e}")))?;

        let results = Self::parse_response(&data, max_results);
        tracing::debug!(count = results.len(), "serpapi search complete");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_organic_results() {
        let data = json!({
            "organic_results": [
                {"title": "A", "link": "https://a.example", "snippet": "about a", "displayed_link": "a.example"},
                {"title": "B", "link": "https://b.example", "snippet": "about b"}
            ]
        });
        let results = SerpApiProvider::parse_response(&data, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://a.example");
        assert_eq!(results[0].provider, "serpapi");
        assert_eq!(results[0].source_type, SourceType::Web);
    }

    #[test]
    fn test_knowledge_graph_leads() {
        let data = json!({
            "knowledge_graph": {"title": "Entity", "website": "https://entity.example", "description": "d"},
            "organic_results": [{"title": "A", "link": "https://a.example", "snippet": ""}]
        });
        let results = SerpApiProvider::parse_response(&data, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://entity.example");
        assert_eq!(results[0].metadata["kind"], "knowledge_graph");
    }

    #[test]
    fn test_knowledge_graph_without_url_skipped() {
        let data = json!({"knowledge_graph": {"title": "Entity"}, "organic_results": []});
        let results = SerpApiProvider::parse_response(&data, 10);
        assert!(results.is_empty());
    }

    #[test]
    fn test_truncates_to_max() {
        let data = json!({
            "organic_results": [
                {"title": "A", "link": "https://a.example"},
                {"title": "B", "link": "https://b.example"},
                {"title": "C", "link": "https://c.example"}
            ]
        });
        let results = SerpApiProvider::parse_response(&data, 2);
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_unconfigured_is_silent_and_empty() {
        let provider = SerpApiProvider::new("");
        assert!(!provider.is_configured());
        let results = provider.search("anything", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_debug_redacts_key() {
        let provider = SerpApiProvider::new("secret-key");
        assert!(!format!("{provider:?}").contains("secret-key"));
    }
}

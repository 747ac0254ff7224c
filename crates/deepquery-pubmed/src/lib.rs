//! # PubMed Academic Search Provider
//!
//! PubMed indexes biomedical and life-science literature through the
//! NCBI E-utilities. This crate contributes the pipeline's second
//! academic source with the standard two-step flow: `esearch` for PMIDs
//! (JSON), then `efetch` for article metadata (XML). No key required.
//!
//! ## Features
//!
//! - Relevance-sorted PMID search
//! - Article metadata: title, abstract, authors, publication year
//! - No API key required (uses the public E-utilities)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use deepquery_pubmed::PubMedProvider;
//! use deepquery::providers::SearchProvider;
//!
//! # tokio_test::block_on(async {
//! let pubmed = PubMedProvider::new();
//! let results = pubmed.search("lithium battery toxicity", 10).await.unwrap();
//! println!("found {} papers", results.len());
//! # });
//! ```

use async_trait::async_trait;
use deepquery::models::SourceType;
use deepquery::providers::{SearchProvider, SearchResult};
use deepquery::{Error, Result, DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use serde_json::{json, Value};

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Abstracts are truncated to this many characters in the snippet.
const SNIPPET_MAX_CHARS: usize = 500;

/// One parsed PubMed article.
#[derive(Debug, Clone, Default)]
pub struct PubMedArticle {
    /// PubMed identifier.
    pub pmid: String,
    /// Article title.
    pub title: String,
    /// Abstract text.
    pub abstract_text: String,
    /// Authors, "First Last" order.
    pub authors: Vec<String>,
    /// Publication year.
    pub year: String,
}

/// PubMed-backed academic search provider.
#[derive(Debug, Clone, Default)]
pub struct PubMedProvider;

impl PubMedProvider {
    /// Create the provider. No credentials are needed.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Extract the PMID list from an `esearch` JSON body.
    pub fn parse_id_list(data: &Value) -> Vec<String> {
        data["esearchresult"]["idlist"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parse an `efetch` XML body into articles.
    pub fn parse_articles(xml: &str) -> Result<Vec<PubMedArticle>> {
        use quick_xml::events::Event;
        use quick_xml::Reader;

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut articles = Vec::new();
        let mut current: Option<PubMedArticle> = None;
        let mut path: Vec<String> = Vec::new();
        let mut last_name = String::new();
        let mut fore_name = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if name == "PubmedArticle" {
                        current = Some(PubMedArticle::default());
                    } else if name == "Author" {
                        last_name.clear();
                        fore_name.clear();
                    }
                    path.push(name);
                }
                Ok(Event::Text(e)) => {
                    let text = e.unescape().unwrap_or_default().to_string();
                    let Some(article) = current.as_mut() else {
                        continue;
                    };
                    match path.last().map(String::as_str) {
                        // The first PMID under an article is the article's own;
                        // reference sections repeat the tag deeper in the tree.
                        Some("PMID") if article.pmid.is_empty() => article.pmid = text,
                        Some("ArticleTitle") => article.title.push_str(&text),
                        Some("AbstractText") => {
                            if !article.abstract_text.is_empty() {
                                article.abstract_text.push(' ');
                            }
                            article.abstract_text.push_str(&text);
                        }
                        Some("LastName") => last_name = text,
                        Some("ForeName") => fore_name = text,
                        Some("Year") if path.iter().any(|p| p == "PubDate") => {
                            if article.year.is_empty() {
                                article.year = text;
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if name == "PubmedArticle" {
                        if let Some(article) = current.take() {
                            articles.push(article);
                        }
                    } else if name == "Author" {
                        if let Some(article) = current.as_mut() {
                            if !last_name.is_empty() {
                                let full = if fore_name.is_empty() {
                                    last_name.clone()
                                } else {
                                    format!("{fore_name} {last_name}")
                                };
                                article.authors.push(full);
                            }
                        }
                    }
                    path.pop();
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(Error::provider("pubmed", format!("XML parsing error: {e}")));
                }
                _ => {}
            }
        }
        Ok(articles)
    }

    fn into_results(articles: Vec<PubMedArticle>) -> Vec<SearchResult> {
        articles
            .into_iter()
            .filter(|article| !article.pmid.is_empty())
            .map(|article| {
                let snippet: String =
                    article.abstract_text.chars().take(SNIPPET_MAX_CHARS).collect();
                SearchResult {
                    title: article.title.clone(),
                    url: format!("https://pubmed.ncbi.nlm.nih.gov/{}/", article.pmid),
                    snippet,
                    source_type: SourceType::Academic,
                    provider: "pubmed".to_string(),
                    author: article.authors.first().cloned(),
                    published_at: (!article.year.is_empty()).then(|| article.year.clone()),
                    metadata: json!({
                        "pmid": article.pmid,
                        "authors": article.authors,
                    }),
                }
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for PubMedProvider {
    fn name(&self) -> &'static str {
        "pubmed"
    }

    fn kind(&self) -> SourceType {
        SourceType::Academic
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let client = create_http_client();

        // Step 1: search for PMIDs.
        let search_response = client
            .get(format!("{EUTILS_BASE}/esearch.fcgi"))
            .query(&[
                ("db", "pubmed"),
                ("term", query),
                ("retmax", &max_results.to_string()),
                ("retmode", "json"),
                ("sort", "relevance"),
            ])
            .send()
            .await
            .map_err(|e| Error::provider("pubmed", format!("esearch failed: {e}")))?;

        if !search_response.status().is_success() {
            let status = search_response.status();
            return Err(Error::provider("pubmed", format!("esearch status {status}")));
        }

        let search_data: Value = search_response
            .json()
            .await
            .map_err(|e| Error::provider("pubmed", format!("undecodable esearch body: {e}")))?;
        let ids = Self::parse_id_list(&search_data);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // Step 2: fetch metadata for the PMIDs.
        let fetch_response = client
            .get(format!("{EUTILS_BASE}/efetch.fcgi"))
            .query(&[
                ("db", "pubmed"),
                ("id", ids.join(",").as_str()),
                ("retmode", "xml"),
            ])
            .send()
            .await
            .map_err(|e| Error::provider("pubmed", format!("efetch failed: {e}")))?;

        if !fetch_response.status().is_success() {
            let status = fetch_response.status();
            return Err(Error::provider("pubmed", format!("efetch status {status}")));
        }

        let xml = fetch_response
            .text()
            .await
            .map_err(|e| Error::provider("pubmed", format!("unreadable efetch body: {e}")))?;

        let articles = Self::parse_articles(&xml)?;
        let results = Self::into_results(articles);
        tracing::debug!(count = results.len(), "pubmed search complete");
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

    const SAMPLE_EFETCH: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">12345678</PMID>
      <Article>
        <Journal>
          <JournalIssue>
            <PubDate><Year>2023</Year><Month>Jun</Month></PubDate>
          </JournalIssue>
        </Journal>
        <ArticleTitle>Battery electrolyte toxicity in aquatic systems.</ArticleTitle>
        <Abstract>
          <AbstractText>Background text.</AbstractText>
          <AbstractText>Conclusion text.</AbstractText>
        </Abstract>
        <AuthorList>
          <Author><LastName>Smith</LastName><ForeName>Ann</ForeName></Author>
          <Author><LastName>Jones</LastName></Author>
        </AuthorList>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_id_list() {
        let data = json!({"esearchresult": {"idlist": ["111", "222"]}});
        assert_eq!(PubMedProvider::parse_id_list(&data), vec!["111", "222"]);
        assert!(PubMedProvider::parse_id_list(&json!({})).is_empty());
    }

    #[test]
    fn test_parse_articles() {
        let articles = PubMedProvider::parse_articles(SAMPLE_EFETCH).unwrap();
        assert_eq!(articles.len(), 1);
        let article = &articles[0];
        assert_eq!(article.pmid, "12345678");
        assert_eq!(article.title, "Battery electrolyte toxicity in aquatic systems.");
        assert_eq!(article.abstract_text, "Background text. Conclusion text.");
        assert_eq!(article.authors, vec!["Ann Smith", "Jones"]);
        assert_eq!(article.year, "2023");
    }

    #[test]
    fn test_into_results_builds_canonical_urls() {
        let articles = PubMedProvider::parse_articles(SAMPLE_EFETCH).unwrap();
        let results = PubMedProvider::into_results(articles);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://pubmed.ncbi.nlm.nih.gov/12345678/");
        assert_eq!(results[0].source_type, SourceType::Academic);
        assert_eq!(results[0].published_at.as_deref(), Some("2023"));
        assert_eq!(results[0].author.as_deref(), Some("Ann Smith"));
    }

    #[test]
    fn test_parse_empty_set() {
        let xml = r#"<?xml version="1.0"?><PubmedArticleSet></PubmedArticleSet>"#;
        assert!(PubMedProvider::parse_articles(xml).unwrap().is_empty());
    }

    #[test]
    fn test_always_configured() {
        assert!(PubMedProvider::new().is_configured());
    }
}

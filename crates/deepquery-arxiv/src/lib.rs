//! # arXiv Academic Search Provider
//!
//! arXiv is an open-access archive for scholarly articles in physics,
//! mathematics, computer science and neighboring fields. This crate
//! contributes one of the pipeline's two academic sources by querying
//! the public Atom API - no key required.
//!
//! ## Features
//!
//! - Full-text query across title, author and abstract
//! - Paper metadata: authors, abstract, publication date, PDF link,
//!   categories
//! - No API key required (uses the public arXiv API)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use deepquery_arxiv::ArxivProvider;
//! use deepquery::providers::SearchProvider;
//!
//! # tokio_test::block_on(async {
//! let arxiv = ArxivProvider::new();
//! let results = arxiv.search("battery recycling", 10).await.unwrap();
//! println!("found {} papers", results.len());
//! # });
//! ```

use async_trait::async_trait;
use deepquery::models::SourceType;
use deepquery::providers::{SearchProvider, SearchResult};
use deepquery::{Error, Result, DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use serde_json::json;

const API_ENDPOINT: &str = "https://export.arxiv.org/api/query";

/// Abstracts are truncated to this many characters in the snippet.
const SNIPPET_MAX_CHARS: usize = 500;

/// One parsed arXiv entry.
#[derive(Debug, Clone, Default)]
pub struct ArxivPaper {
    /// Entry id (abs URL).
    pub id: String,
    /// Paper title.
    pub title: String,
    /// Authors, in listing order.
    pub authors: Vec<String>,
    /// Abstract text.
    pub summary: String,
    /// Publication date string.
    pub published: String,
    /// Direct PDF link, when present.
    pub pdf_url: String,
    /// arXiv category terms.
    pub categories: Vec<String>,
}

/// arXiv-backed academic search provider.
#[derive(Debug, Clone, Default)]
pub struct ArxivProvider;

impl ArxivProvider {
    /// Create the provider. No credentials are needed.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse an arXiv Atom XML response into papers.
    pub fn parse_response(xml: &str) -> Result<Vec<ArxivPaper>> {
        use quick_xml::events::Event;
        use quick_xml::Reader;

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut papers = Vec::new();
        let mut current: Option<ArxivPaper> = None;
        let mut in_entry = false;
        let mut in_author = false;
        let mut text_buffer = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if name == "entry" {
                        in_entry = true;
                        current = Some(ArxivPaper::default());
                    } else if name == "author" && in_entry {
                        in_author = true;
                    } else if name == "link" && in_entry {
                        let mut is_pdf = false;
                        let mut href = String::new();
                        for attr in e.attributes().flatten() {
                            let key = String::from_utf8_lossy(attr.key.as_ref());
                            let value = String::from_utf8_lossy(&attr.value);
                            if key == "title" && value == "pdf" {
                                is_pdf = true;
                            }
                            if key == "href" {
                                href = value.to_string();
                            }
                        }
                        if is_pdf && !href.is_empty() {
                            if let Some(paper) = current.as_mut() {
                                paper.pdf_url = href;
                            }
                        }
                    } else if name == "category" && in_entry {
                        for attr in e.attributes().flatten() {
                            if String::from_utf8_lossy(attr.key.as_ref()) == "term" {
                                if let Some(paper) = current.as_mut() {
                                    paper
                                        .categories
                                        .push(String::from_utf8_lossy(&attr.value).to_string());
                                }
                            }
                        }
                    }
                }
                Ok(Event::Text(e)) => {
                    text_buffer = e.unescape().unwrap_or_default().to_string();
                }
                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if name == "entry" {
                        if let Some(paper) = current.take() {
                            papers.push(paper);
                        }
                        in_entry = false;
                    } else if name == "author" {
                        in_author = false;
                    } else if in_entry {
                        if let Some(paper) = current.as_mut() {
                            match name.as_str() {
                                "id" => paper.id = text_buffer.clone(),
                                "title" => paper.title = text_buffer.replace('\n', " "),
                                "summary" => paper.summary = text_buffer.replace('\n', " "),
                                "published" => paper.published = text_buffer.clone(),
                                "name" if in_author => paper.authors.push(text_buffer.clone()),
                                _ => {}
                            }
                        }
                    }
                    text_buffer.clear();
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(Error::provider("arxiv", format!("XML parsing error: {e}")));
                }
                _ => {}
            }
        }
        Ok(papers)
    }

    fn into_results(papers: Vec<ArxivPaper>) -> Vec<SearchResult> {
        papers
            .into_iter()
            .filter(|paper| !paper.id.is_empty())
            .map(|paper| {
                let snippet: String = paper.summary.chars().take(SNIPPET_MAX_CHARS).collect();
                let arxiv_id = paper
                    .id
                    .rsplit("/abs/")
                    .next()
                    .unwrap_or_default()
                    .to_string();
                SearchResult {
                    title: paper.title.trim().to_string(),
                    url: paper.id.clone(),
                    snippet,
                    source_type: SourceType::Academic,
                    provider: "arxiv".to_string(),
                    author: paper.authors.first().cloned(),
                    published_at: (!paper.published.is_empty()).then(|| paper.published.clone()),
                    metadata: json!({
                        "arxiv_id": arxiv_id,
                        "pdf_url": paper.pdf_url,
                        "authors": paper.authors,
                        "categories": paper.categories,
                    }),
                }
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for ArxivProvider {
    fn name(&self) -> &'static str {
        "arxiv"
    }

    fn kind(&self) -> SourceType {
        SourceType::Academic
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let url = format!(
            "{API_ENDPOINT}?search_query=all:{}&start=0&max_results={max_results}&sortBy=relevance",
            urlencoding::encode(query),
        );

        let client = create_http_client();
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::provider("arxiv", format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::provider("arxiv", format!("status {status}")));
        }

        let xml = response
            .text()
            .await
            .map_err(|e| Error::provider("arxiv", format!("unreadable response: {e}")))?;

        let papers = Self::parse_response(&xml)?;
        let results = Self::into_results(papers);
        tracing::debug!(count = results.len(), "arxiv search complete");
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

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2401.00001v1</id>
    <title>Direct recycling of lithium-ion
 cathodes</title>
    <summary>We study closed-loop recovery of cathode materials.</summary>
    <published>2024-01-01T00:00:00Z</published>
    <author><name>A. Researcher</name></author>
    <author><name>B. Colleague</name></author>
    <link href="http://arxiv.org/pdf/2401.00001v1" title="pdf" rel="related"/>
    <category term="cond-mat.mtrl-sci"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2401.00002v1</id>
    <title>Second paper</title>
    <summary>Another abstract.</summary>
    <published>2024-01-02T00:00:00Z</published>
    <author><name>C. Author</name></author>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed() {
        let papers = ArxivProvider::parse_response(SAMPLE_FEED).unwrap();
        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].authors, vec!["A. Researcher", "B. Colleague"]);
        assert_eq!(papers[0].pdf_url, "http://arxiv.org/pdf/2401.00001v1");
        assert_eq!(papers[0].categories, vec!["cond-mat.mtrl-sci"]);
        assert_eq!(papers[0].published, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_into_results() {
        let papers = ArxivProvider::parse_response(SAMPLE_FEED).unwrap();
        let results = ArxivProvider::into_results(papers);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "http://arxiv.org/abs/2401.00001v1");
        assert_eq!(results[0].source_type, SourceType::Academic);
        assert_eq!(results[0].author.as_deref(), Some("A. Researcher"));
        assert_eq!(results[0].metadata["arxiv_id"], "2401.00001v1");
        assert!(!results[0].title.contains('\n'));
    }

    #[test]
    fn test_parse_empty_feed() {
        let xml = r#"<?xml version="1.0"?><feed xmlns="http://www.w3.org/2005/Atom"></feed>"#;
        let papers = ArxivProvider::parse_response(xml).unwrap();
        assert!(papers.is_empty());
    }

    #[test]
    fn test_always_configured() {
        assert!(ArxivProvider::new().is_configured());
    }
}

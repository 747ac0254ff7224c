// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Domain-level source credibility heuristics.
//!
//! A small curated table of known-credible domains plus structural
//! checks (HTTPS, blog platforms, unverified news naming). Scores stay in
//! [0, 1]; `>= 0.7` counts as credible. These heuristics feed the verify
//! stage's per-source credibility and the confidence summary.

use serde::{Deserialize, Serialize};
use url::Url;

/// Known domains and their baseline credibility scores. Suffix entries
/// (leading dot) match any subdomain.
const CREDIBLE_DOMAINS: &[(&str, f64)] = &[
    // Government and education
    (".gov", 0.95),
    (".gov.uk", 0.95),
    (".edu", 0.90),
    // Academic publishing
    ("nature.com", 0.95),
    ("science.org", 0.95),
    ("sciencedirect.com", 0.90),
    ("springer.com", 0.90),
    ("wiley.com", 0.90),
    ("arxiv.org", 0.85),
    ("pubmed.ncbi.nlm.nih.gov", 0.95),
    // Mainstream news
    ("reuters.com", 0.90),
    ("apnews.com", 0.90),
    ("bbc.com", 0.85),
    ("bbc.co.uk", 0.85),
    ("nytimes.com", 0.80),
    ("washingtonpost.com", 0.80),
    ("theguardian.com", 0.80),
    // Tech press
    ("wired.com", 0.75),
    ("arstechnica.com", 0.75),
    ("techcrunch.com", 0.70),
    // Reference
    ("wikipedia.org", 0.70),
    ("britannica.com", 0.85),
];

/// Threshold above which a source counts as credible.
pub const CREDIBLE_THRESHOLD: f64 = 0.7;

/// Outcome of a domain credibility assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredibilityAssessment {
    /// The assessed URL.
    pub url: String,
    /// Normalized domain (www. stripped).
    pub domain: String,
    /// Score in [0, 1].
    pub credibility_score: f64,
    /// Inferred source category label.
    pub source_type: String,
    /// Structural warnings accumulated during assessment.
    pub warnings: Vec<String>,
    /// Whether the score clears [`CREDIBLE_THRESHOLD`].
    pub is_credible: bool,
}

/// Assess a source URL against the domain table and structural checks.
pub fn assess_url(raw_url: &str) -> CredibilityAssessment {
    let mut warnings = Vec::new();
    let mut score = 0.5;

    let Ok(parsed) = Url::parse(raw_url) else {
        return CredibilityAssessment {
            url: raw_url.to_string(),
            domain: String::new(),
            credibility_score: 0.3,
            source_type: "unknown".to_string(),
            warnings: vec!["URL could not be parsed".to_string()],
            is_credible: false,
        };
    };

    let mut domain = parsed.host_str().unwrap_or_default().to_lowercase();
    if let Some(stripped) = domain.strip_prefix("www.") {
        domain = stripped.to_string();
    }

    for (known, known_score) in CREDIBLE_DOMAINS {
        let matched = if known.starts_with('.') {
            domain.ends_with(known)
        } else {
            domain == *known || domain.ends_with(&format!(".{known}"))
        };
        if matched {
            score = *known_score;
            break;
        }
    }

    if ["blog", "wordpress", "medium", "substack"]
        .iter()
        .any(|marker| domain.contains(marker))
    {
        score = score.min(0.5);
        warnings.push("Personal blog or opinion platform".to_string());
    }

    let is_known = CREDIBLE_DOMAINS.iter().any(|(known, _)| {
        if known.starts_with('.') {
            domain.ends_with(known)
        } else {
            domain == *known || domain.ends_with(&format!(".{known}"))
        }
    });
    if !is_known
        && ["news", "daily", "times"]
            .iter()
            .any(|marker| domain.contains(marker))
    {
        score = score.min(0.6);
        warnings.push("Unverified news source".to_string());
    }

    if parsed.scheme() != "https" {
        score -= 0.1;
        warnings.push("Not using secure connection (HTTPS)".to_string());
    }

    let source_type = infer_source_type(&domain);

    let score = score.clamp(0.0, 1.0);
    CredibilityAssessment {
        url: raw_url.to_string(),
        domain,
        credibility_score: score,
        source_type,
        warnings,
        is_credible: score >= CREDIBLE_THRESHOLD,
    }
}

fn infer_source_type(domain: &str) -> String {
    if domain.ends_with(".gov") || domain.contains(".gov.") || domain.ends_with(".edu") {
        "official".to_string()
    } else if [
        "arxiv.org",
        "pubmed.ncbi.nlm.nih.gov",
        "nature.com",
        "science.org",
    ]
    .contains(&domain)
    {
        "academic".to_string()
    } else if ["news", "times", "post", "reuters", "bbc"]
        .iter()
        .any(|marker| domain.contains(marker))
    {
        "news".to_string()
    } else if ["blog", "medium", "substack"]
        .iter()
        .any(|marker| domain.contains(marker))
    {
        "blog".to_string()
    } else {
        "unknown".to_string()
    }
}

/// Aggregate per-source bias scores into a session-level analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasAnalysis {
    /// Mean bias score over analyzed sources.
    pub average_bias_score: f64,
    /// "low" (< 0.3), "moderate" (< 0.6) or "high".
    pub bias_level: String,
    /// Distinct bias categories encountered.
    pub common_bias_types: Vec<String>,
    /// How many sources contributed a score.
    pub sources_analyzed: usize,
    /// Reader guidance based on the level.
    pub recommendation: String,
}

/// Build the aggregate from individual scores and type labels.
pub fn aggregate_bias(scores: &[f64], mut types: Vec<String>) -> BiasAnalysis {
    let average = if scores.is_empty() {
        0.5
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };

    types.sort();
    types.dedup();

    let (level, recommendation) = if average < 0.3 {
        ("low", "Sources appear relatively balanced and objective.")
    } else if average < 0.6 {
        (
            "moderate",
            "Some bias detected. Consider seeking additional perspectives.",
        )
    } else {
        (
            "high",
            "Significant bias detected. Findings should be interpreted with caution.",
        )
    };

    BiasAnalysis {
        average_bias_score: average,
        bias_level: level.to_string(),
        common_bias_types: types,
        sources_analyzed: scores.len(),
        recommendation: recommendation.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_government_domains_score_high() {
        let assessment = assess_url("https://www.epa.gov/recycling");
        assert!(assessment.credibility_score >= 0.9);
        assert!(assessment.is_credible);
        assert_eq!(assessment.source_type, "official");
        assert_eq!(assessment.domain, "epa.gov");
    }

    #[test]
    fn test_academic_domains() {
        let assessment = assess_url("https://arxiv.org/abs/2401.00001");
        assert!((assessment.credibility_score - 0.85).abs() < 1e-9);
        assert_eq!(assessment.source_type, "academic");
    }

    #[test]
    fn test_blog_platform_capped() {
        let assessment = assess_url("https://someone.medium.com/my-take");
        assert!(assessment.credibility_score <= 0.5);
        assert!(assessment
            .warnings
            .iter()
            .any(|w| w.contains("blog or opinion")));
    }

    #[test]
    fn test_http_penalty() {
        let https = assess_url("https://unknown-site.example/page");
        let http = assess_url("http://unknown-site.example/page");
        assert!(http.credibility_score < https.credibility_score);
        assert!(http.warnings.iter().any(|w| w.contains("HTTPS")));
    }

    #[test]
    fn test_unverified_news_penalty() {
        let assessment = assess_url("https://breaking-news-daily.example/story");
        assert!(assessment.credibility_score <= 0.6);
        assert!(!assessment.is_credible);
    }

    #[test]
    fn test_unparseable_url() {
        let assessment = assess_url("not a url");
        assert!((assessment.credibility_score - 0.3).abs() < 1e-9);
        assert!(!assessment.is_credible);
    }

    #[test]
    fn test_bias_aggregation_levels() {
        let low = aggregate_bias(&[0.1, 0.2], vec![]);
        assert_eq!(low.bias_level, "low");

        let moderate = aggregate_bias(&[0.4, 0.5], vec!["framing".to_string()]);
        assert_eq!(moderate.bias_level, "moderate");
        assert_eq!(moderate.sources_analyzed, 2);

        let high = aggregate_bias(&[0.8, 0.9], vec![]);
        assert_eq!(high.bias_level, "high");
    }

    #[test]
    fn test_bias_empty_defaults_neutral() {
        let analysis = aggregate_bias(&[], vec![]);
        assert!((analysis.average_bias_score - 0.5).abs() < 1e-9);
        assert_eq!(analysis.bias_level, "moderate");
        assert_eq!(analysis.sources_analyzed, 0);
    }

    #[test]
    fn test_bias_types_deduplicated() {
        let analysis = aggregate_bias(
            &[0.4],
            vec!["framing".to_string(), "framing".to_string(), "selection".to_string()],
        );
        assert_eq!(analysis.common_bias_types, vec!["framing", "selection"]);
    }
}

// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Retrieve stage: query variants, provider fan-out, deduplication,
//! two-phase relevance filtering and bounded finding extraction.
//!
//! Output guarantees: at most `max_sources` persisted sources, every one
//! with a non-empty URL unique within the session, and findings whose
//! numeric source tags are resolved to `{title, url}` references. The
//! original query text drives retrieval verbatim; a clarified variant is
//! at most one extra search hint.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use super::{AgentContext, PipelineAgent, Stage, StageOutput};
use crate::error::Result;
use crate::fanout::{FanoutCallback, SearchFanout};
use crate::json;
use crate::llm::GenerateRequest;
use crate::models::{Credibility, Finding, ResearchDepth, Source, SourceRef, SourceType};
use crate::providers::SearchResult;
use crate::store::SessionPatch;

const SYSTEM_PROMPT: &str = "You are a research expert who searches multiple sources to \
gather comprehensive information. Cast a wide net, prioritize authoritative sources, \
note publication dates, and preserve source attribution.";

/// Query-variant caps: standard / deep.
const VARIANT_CAP_STANDARD: usize = 8;
const VARIANT_CAP_DEEP: usize = 12;

/// Lexical pre-filter keeps this many candidates for the LLM pass.
const LEXICAL_KEEP: usize = 150;

/// Batch size for the LLM relevance pass.
const RELEVANCE_BATCH: usize = 20;

/// Lexical score floor used when one relevance batch fails to parse.
const LEXICAL_FALLBACK_FLOOR: f64 = 0.1;

/// Below this many combined results the lexical ordering refills the set.
const MIN_RELEVANT: usize = 10;

/// Refill target for the minimum guarantee.
const REFILL_TARGET: usize = 50;

/// Extraction examines at most this many sources: standard / deep.
const EXTRACT_CAP_STANDARD: usize = 45;
const EXTRACT_CAP_DEEP: usize = 60;

/// Batch size for finding extraction.
const EXTRACT_BATCH: usize = 15;

/// Findings above this count go through the near-duplicate merge.
const MERGE_THRESHOLD: usize = 10;

/// Common words removed before lexical scoring.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "how", "in", "is",
    "it", "of", "on", "or", "that", "the", "to", "was", "what", "when", "where", "which", "who",
    "why", "will", "with",
];

/// Retrieve agent: drives the provider fan-out across query variants.
pub struct RetrieveAgent {
    fanout: SearchFanout,
}

struct ScoredCandidate {
    result: SearchResult,
    score: f64,
}

#[async_trait]
impl PipelineAgent for RetrieveAgent {
    fn stage(&self) -> Stage {
        Stage::Retrieve
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<StageOutput> {
        let max_sources = ctx.params.max_sources;
        if max_sources == 0 {
            ctx.report(Stage::Retrieve, "in_progress", 100, "Source cap is zero; nothing to retrieve")
                .await;
            return Ok(StageOutput::Retrieved {
                sources_persisted: 0,
                findings_extracted: 0,
            });
        }

        ctx.report(Stage::Retrieve, "in_progress", 5, "Preparing search strategy...")
            .await;

        let variants = self.generate_variants(ctx).await?;
        ctx.report(
            Stage::Retrieve,
            "in_progress",
            10,
            format!("Generated {} search queries", variants.len()),
        )
        .await;

        let raw = self.run_fanout(ctx, &variants).await?;
        // Nothing further is persisted once cancellation has fired.
        if ctx.cancel.is_cancelled() {
            return Err(crate::error::Error::Cancelled);
        }

        ctx.report(
            Stage::Retrieve,
            "in_progress",
            70,
            format!("Collected {} candidates, deduplicating...", raw.len()),
        )
        .await;

        let unique = dedup_by_url(raw);

        let relevant = self.filter_relevant(ctx, unique).await?;
        let mut kept: Vec<SearchResult> = relevant.into_iter().take(max_sources).collect();
        // Guaranteed by dedup, restated for the store: non-empty distinct URLs.
        kept.retain(|r| !r.url.is_empty());

        ctx.report(
            Stage::Retrieve,
            "in_progress",
            85,
            format!("Persisting {} relevant sources...", kept.len()),
        )
        .await;

        let sources: Vec<Source> = kept.into_iter().map(SearchResult::into_source).collect();
        let counts = count_by_provider(&sources, &self.fanout.provider_names());
        if let Err(e) = ctx.store.sources_append(&ctx.session_id, sources.clone()).await {
            tracing::error!(session_id = %ctx.session_id, error = %e, "source persist failed; continuing");
        }
        ctx.patch_session(SessionPatch::new().sources_count(counts)).await;

        ctx.report(Stage::Retrieve, "in_progress", 90, "Extracting key findings...")
            .await;

        let mut findings = self.extract_findings(ctx, &sources).await;
        if findings.len() > MERGE_THRESHOLD {
            findings = self.merge_near_duplicates(ctx, findings).await;
        }
        let findings_extracted = findings.len();
        if !findings.is_empty() {
            if let Err(e) = ctx.store.findings_append(&ctx.session_id, findings).await {
                tracing::error!(session_id = %ctx.session_id, error = %e, "finding persist failed; continuing");
            }
        }
        ctx.patch_session(SessionPatch::new().findings_count(findings_extracted)).await;

        ctx.report(
            Stage::Retrieve,
            "in_progress",
            100,
            format!("Research complete: {} sources found", sources.len()),
        )
        .await;

        Ok(StageOutput::Retrieved {
            sources_persisted: sources.len(),
            findings_extracted,
        })
    }
}

impl RetrieveAgent {
    /// Create the agent over a configured fan-out.
    pub fn new(fanout: SearchFanout) -> Self {
        Self { fanout }
    }

    /// Original query first, then the search hint, one variant per focus
    /// area, then up to five LLM-generated variants; capped at 8 (12 deep).
    async fn generate_variants(&self, ctx: &AgentContext) -> Result<Vec<String>> {
        let mut variants = vec![ctx.effective_query.clone()];
        if let Some(hint) = &ctx.search_hint {
            if hint != &ctx.effective_query {
                variants.push(hint.clone());
            }
        }
        for area in &ctx.params.focus_areas {
            variants.push(format!("{} {}", ctx.effective_query, area));
        }

        let prompt = format!(
            "Generate 3-5 additional search queries to comprehensively research this topic.\n\n\
             Main Query: {query}\n\
             Focus Areas: {focus}\n\n\
             Generate specific, targeted search queries.\n\
             Return only the queries, one per line, no numbering or explanation.",
            query = ctx.effective_query,
            focus = if ctx.params.focus_areas.is_empty() {
                "General".to_string()
            } else {
                ctx.params.focus_areas.join(", ")
            },
        );
        let request = GenerateRequest::new(prompt, &ctx.config.models.researcher)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(0.3)
            .with_max_tokens(512);

        match ctx.think(request).await {
            Ok(reply) => {
                let additional: Vec<String> = reply
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .take(5)
                    .map(ToString::to_string)
                    .collect();
                variants.extend(additional);
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "variant generation failed");
            }
        }

        let cap = match ctx.params.depth {
            ResearchDepth::Standard => VARIANT_CAP_STANDARD,
            ResearchDepth::Deep => VARIANT_CAP_DEEP,
        };
        variants.truncate(cap);
        Ok(variants)
    }

    /// Fan out every variant, accumulating until `2 * max_sources`.
    async fn run_fanout(
        &self,
        ctx: &AgentContext,
        variants: &[String],
    ) -> Result<Vec<SearchResult>> {
        let max_sources = ctx.params.max_sources;
        let per_provider = per_provider_cap(max_sources, variants.len(), ctx.params.depth);

        let session_id = ctx.session_id.clone();
        let on_done: FanoutCallback = Arc::new(move |provider, count, done, total| {
            tracing::debug!(
                session_id = %session_id,
                provider,
                results = count,
                completed = done,
                total,
                "provider completed"
            );
        });

        let mut accumulated: Vec<SearchResult> = Vec::new();
        for (index, variant) in variants.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return Err(crate::error::Error::Cancelled);
            }

            let progress = 10 + ((index as f64 / variants.len() as f64) * 60.0) as u8;
            let label: String = variant.chars().take(50).collect();
            ctx.report(Stage::Retrieve, "in_progress", progress, format!("Searching: {label}..."))
                .await;

            let results = self
                .fanout
                .search_all(variant, per_provider, &ctx.cancel, Some(Arc::clone(&on_done)))
                .await;
            for (_provider, items) in results {
                accumulated.extend(items);
            }

            if accumulated.len() > max_sources * 2 {
                tracing::debug!(
                    session_id = %ctx.session_id,
                    accumulated = accumulated.len(),
                    "early stop: enough candidates"
                );
                break;
            }
        }
        Ok(accumulated)
    }

    /// Two-phase relevance filter with the lexical fallback chain and the
    /// minimum-size guarantee.
    async fn filter_relevant(
        &self,
        ctx: &AgentContext,
        candidates: Vec<SearchResult>,
    ) -> Result<Vec<SearchResult>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        ctx.report(
            Stage::Retrieve,
            "in_progress",
            75,
            format!("Ranking {} unique candidates...", candidates.len()),
        )
        .await;

        // Phase A: lexical pre-filter.
        let keywords = query_keywords(&ctx.query);
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|result| {
                let score = lexical_score(&result, &keywords);
                ScoredCandidate { result, score }
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(LEXICAL_KEEP);

        // Phase B: LLM batch filter over the lexical survivors.
        let mut kept_indices: Vec<usize> = Vec::new();
        let mut any_batch_parsed = false;

        for (batch_number, batch) in scored.chunks(RELEVANCE_BATCH).enumerate() {
            let offset = batch_number * RELEVANCE_BATCH;
            match self.relevance_batch(ctx, batch).await {
                Ok(local) => {
                    any_batch_parsed = true;
                    kept_indices.extend(
                        local
                            .into_iter()
                            .filter(|&i| i < batch.len())
                            .map(|i| offset + i),
                    );
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    // Per-batch fallback: keep lexically strong candidates
                    // from this batch only.
                    tracing::warn!(
                        session_id = %ctx.session_id,
                        batch = batch_number,
                        error = %e,
                        "relevance batch failed; applying lexical fallback"
                    );
                    kept_indices.extend(batch.iter().enumerate().filter_map(|(i, c)| {
                        (c.score >= LEXICAL_FALLBACK_FLOOR).then_some(offset + i)
                    }));
                }
            }
        }

        // Every batch failed: fall back to the lexical ordering outright.
        if !any_batch_parsed {
            tracing::warn!(
                session_id = %ctx.session_id,
                "relevance filtering unavailable; falling back to lexical ranking"
            );
            let top: Vec<SearchResult> = scored
                .into_iter()
                .take(ctx.params.max_sources)
                .map(|c| c.result)
                .collect();
            return Ok(top);
        }

        // Minimum guarantee: refill from the lexical ordering.
        if kept_indices.len() < MIN_RELEVANT {
            let chosen: HashSet<usize> = kept_indices.iter().copied().collect();
            for index in 0..scored.len() {
                if kept_indices.len() >= REFILL_TARGET {
                    break;
                }
                if !chosen.contains(&index) {
                    kept_indices.push(index);
                }
            }
        }

        kept_indices.sort_unstable();
        kept_indices.dedup();

        let mut keep_flags = vec![false; scored.len()];
        for index in kept_indices {
            keep_flags[index] = true;
        }
        Ok(scored
            .into_iter()
            .zip(keep_flags)
            .filter_map(|(candidate, keep)| keep.then_some(candidate.result))
            .collect())
    }

    /// Ask the LLM which candidates in a batch are relevant; returns
    /// batch-local indices.
    async fn relevance_batch(
        &self,
        ctx: &AgentContext,
        batch: &[ScoredCandidate],
    ) -> Result<Vec<usize>> {
        let mut listing = String::new();
        for (index, candidate) in batch.iter().enumerate() {
            let snippet: String = candidate.result.snippet.chars().take(200).collect();
            listing.push_str(&format!(
                "[{index}] {title} - {snippet}\n",
                title = candidate.result.title
            ));
        }

        let prompt = format!(
            "You are filtering search results for relevance to a research query.\n\n\
             QUERY: {query}\n\n\
             CANDIDATES:\n{listing}\n\
             Reply with ONLY the comma-separated indices of candidates relevant to the \
             query (for example: 0, 2, 5), or the single word NONE if none are relevant.",
            query = ctx.query
        );
        let request = GenerateRequest::new(prompt, &ctx.config.models.researcher)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(0.1)
            .with_max_tokens(256);

        let reply = ctx.think(request).await?;
        json::parse_index_list(&reply)
    }

    /// Extract findings from the final sources in batches; a failed batch
    /// contributes nothing without aborting the stage.
    async fn extract_findings(&self, ctx: &AgentContext, sources: &[Source]) -> Vec<Finding> {
        if sources.is_empty() {
            return Vec::new();
        }

        let cap = match ctx.params.depth {
            ResearchDepth::Standard => EXTRACT_CAP_STANDARD,
            ResearchDepth::Deep => EXTRACT_CAP_DEEP,
        };
        let examined = &sources[..sources.len().min(cap)];

        let mut findings = Vec::new();
        for batch in examined.chunks(EXTRACT_BATCH) {
            if ctx.cancel.is_cancelled() {
                break;
            }

            let mut listing = String::new();
            for (index, source) in batch.iter().enumerate() {
                let snippet: String = source.snippet.chars().take(300).collect();
                listing.push_str(&format!(
                    "[{n}] {title}\n{snippet}\n\n",
                    n = index + 1,
                    title = source.title
                ));
            }

            let prompt = format!(
                "Based on these sources, extract the key findings related to the query.\n\n\
                 QUERY: {query}\n\n\
                 SOURCES:\n{listing}\
                 Extract 3-7 key findings. For each finding:\n\
                 1. State the finding clearly\n\
                 2. Note which source(s) support it [using source numbers]\n\
                 3. Assess preliminary credibility (high/medium/low)\n\n\
                 Format each finding as:\n\
                 FINDING: [statement]\n\
                 SOURCES: [1, 2, ...]\n\
                 CREDIBILITY: [high/medium/low]\n\
                 ---",
                query = ctx.query
            );
            let request = GenerateRequest::new(prompt, &ctx.config.models.researcher)
                .with_system_prompt(SYSTEM_PROMPT)
                .with_temperature(0.3)
                .with_max_tokens(2048);

            match ctx.think(request).await {
                Ok(reply) => findings.extend(parse_findings(&reply, batch)),
                Err(e) => {
                    tracing::warn!(session_id = %ctx.session_id, error = %e, "finding extraction batch failed");
                }
            }
        }
        findings
    }

    /// Ask the LLM for a deduplicated subset; keep everything on parse
    /// failure.
    async fn merge_near_duplicates(
        &self,
        ctx: &AgentContext,
        findings: Vec<Finding>,
    ) -> Vec<Finding> {
        let mut listing = String::new();
        for (index, finding) in findings.iter().enumerate() {
            let content: String = finding.content.chars().take(200).collect();
            listing.push_str(&format!("[{index}] {content}\n"));
        }

        let prompt = format!(
            "These research findings may contain near-duplicates.\n\n{listing}\n\
             Reply with ONLY the comma-separated indices of a deduplicated subset, \
             keeping the most complete phrasing of each distinct claim."
        );
        let request = GenerateRequest::new(prompt, &ctx.config.models.researcher)
            .with_temperature(0.1)
            .with_max_tokens(256);

        let reply = match ctx.think(request).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "finding merge failed; keeping all");
                return findings;
            }
        };
        match json::parse_index_list(&reply) {
            Ok(indices) if !indices.is_empty() => {
                let keep: HashSet<usize> = indices.into_iter().collect();
                findings
                    .into_iter()
                    .enumerate()
                    .filter_map(|(index, finding)| keep.contains(&index).then_some(finding))
                    .collect()
            }
            _ => findings,
        }
    }
}

/// clamp(max_sources / (variants * 3), 5, 15); doubled in deep mode with a
/// hard cap of 25.
fn per_provider_cap(max_sources: usize, variant_count: usize, depth: ResearchDepth) -> usize {
    let base = max_sources / (variant_count.max(1) * 3);
    let capped = base.clamp(5, 15);
    match depth {
        ResearchDepth::Standard => capped,
        ResearchDepth::Deep => (capped * 2).min(25),
    }
}

/// Keep the first occurrence of every URL; drop empty URLs.
fn dedup_by_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|result| !result.url.is_empty() && seen.insert(result.url.clone()))
        .collect()
}

/// Lowercased query tokens minus stop words.
fn query_keywords(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 1 && !STOP_WORDS.contains(token))
        .map(ToString::to_string)
        .collect()
}

/// Fraction of query keywords found in title+snippet, boosted 1.2x for
/// academic sources.
fn lexical_score(result: &SearchResult, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let haystack = format!("{} {}", result.title, result.snippet).to_lowercase();
    let matches = keywords
        .iter()
        .filter(|keyword| haystack.contains(keyword.as_str()))
        .count();
    let mut score = matches as f64 / keywords.len() as f64;
    if result.source_type == SourceType::Academic {
        score *= 1.2;
    }
    score
}

/// Parse the FINDING/SOURCES/CREDIBILITY line format; source numbers are
/// 1-based offsets into the extraction batch.
fn parse_findings(reply: &str, batch: &[Source]) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut current: Option<Finding> = None;

    for line in reply.lines() {
        let line = line.trim();
        if let Some(statement) = line.strip_prefix("FINDING:") {
            if let Some(finding) = current.take() {
                findings.push(finding);
            }
            let statement = statement.trim();
            if !statement.is_empty() {
                current = Some(Finding::new(statement, Credibility::Medium, Stage::Retrieve.as_str()));
            }
        } else if let Some(refs) = line.strip_prefix("SOURCES:") {
            if let Some(finding) = current.as_mut() {
                finding.source_refs = resolve_refs(refs, batch);
            }
        } else if let Some(label) = line.strip_prefix("CREDIBILITY:") {
            if let Some(finding) = current.as_mut() {
                finding.credibility = Credibility::parse(label);
            }
        } else if line == "---" {
            if let Some(finding) = current.take() {
                findings.push(finding);
            }
        }
    }
    if let Some(finding) = current.take() {
        findings.push(finding);
    }
    findings
}

fn resolve_refs(raw: &str, batch: &[Source]) -> Vec<SourceRef> {
    json::parse_index_list(raw)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|n| {
            // 1-based batch offsets.
            n.checked_sub(1).and_then(|i| batch.get(i)).map(|source| SourceRef {
                title: source.title.clone(),
                url: source.url.clone(),
            })
        })
        .collect()
}

fn count_by_provider(sources: &[Source], provider_names: &[&'static str]) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = provider_names
        .iter()
        .map(|name| ((*name).to_string(), 0))
        .collect();
    for source in sources {
        *counts.entry(source.provider.clone()).or_insert(0) += 1;
    }
    counts.insert("total".to_string(), sources.len());
    counts
}

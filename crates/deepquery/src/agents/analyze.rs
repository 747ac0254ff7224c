// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Analyze stage: synthesis of retrieved sources and raw findings into
//! consolidated findings, patterns, contradictions, insights and an
//! organized hierarchy.
//!
//! Inputs come from the store by session id; every output is persisted
//! under its pipeline-artifact key before the stage returns. Each LLM
//! reply goes through the lenient JSON extraction with a documented
//! fallback: restructure the raw findings, then generate emergency
//! findings straight from sources, then an empty list.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{AgentContext, PipelineAgent, Stage, StageOutput};
use crate::error::Result;
use crate::json;
use crate::llm::GenerateRequest;
use crate::models::{artifact, Finding, Source};

const SYSTEM_PROMPT: &str = "You are an expert research analyst who synthesizes information \
from multiple sources into actionable findings. Every finding must be supported by specific \
data, quotes, or statistics from sources. Be objective, weigh evidence by credibility and \
recency, distinguish established facts from speculation, and note gaps in the available \
information as findings themselves.";

/// Analyze agent.
pub struct AnalyzeAgent;

#[async_trait]
impl PipelineAgent for AnalyzeAgent {
    fn stage(&self) -> Stage {
        Stage::Analyze
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<StageOutput> {
        let sources = ctx.store.sources_list(&ctx.session_id).await?;
        let raw_findings = ctx.store.findings_list(&ctx.session_id).await?;

        ctx.report(Stage::Analyze, "in_progress", 5, "Beginning analysis of collected data...")
            .await;

        ctx.report(Stage::Analyze, "in_progress", 15, "Consolidating findings from sources...")
            .await;
        let consolidated = self.consolidate(ctx, &sources, &raw_findings).await?;
        ctx.persist_artifact(artifact::CONSOLIDATED_FINDINGS, Value::Array(consolidated.clone()))
            .await;

        ctx.report(Stage::Analyze, "in_progress", 35, "Identifying patterns and themes...")
            .await;
        let patterns = self.identify_patterns(ctx, &consolidated).await?;
        ctx.persist_artifact(artifact::PATTERNS, Value::Array(patterns.clone())).await;

        ctx.report(Stage::Analyze, "in_progress", 55, "Detecting contradictions...")
            .await;
        let contradictions = self.detect_contradictions(ctx, &consolidated).await?;
        ctx.persist_artifact(artifact::CONTRADICTIONS, Value::Array(contradictions)).await;

        ctx.report(Stage::Analyze, "in_progress", 75, "Extracting key insights...")
            .await;
        let insights = self.extract_insights(ctx, &consolidated, &patterns).await?;
        ctx.persist_artifact(artifact::KEY_INSIGHTS, json!(insights)).await;

        ctx.report(Stage::Analyze, "in_progress", 90, "Organizing findings...")
            .await;
        let organized = organize_findings(&consolidated, &patterns);
        let organized_count = organized.len();
        ctx.persist_artifact(artifact::ORGANIZED_FINDINGS, Value::Array(organized)).await;

        ctx.report(
            Stage::Analyze,
            "in_progress",
            100,
            format!("Analysis complete: {organized_count} findings organized"),
        )
        .await;

        Ok(StageOutput::Analyzed {
            findings_organized: organized_count,
        })
    }
}

impl AnalyzeAgent {
    /// Group sources and raw findings into 4-8 consolidated findings.
    async fn consolidate(
        &self,
        ctx: &AgentContext,
        sources: &[Source],
        raw_findings: &[Finding],
    ) -> Result<Vec<Value>> {
        let source_context: Vec<String> = sources
            .iter()
            .take(40)
            .enumerate()
            .map(|(i, source)| {
                let snippet: String = source.snippet.chars().take(300).collect();
                format!(
                    "[S{n}] ({kind}) {title} by {author}: {snippet}",
                    n = i + 1,
                    kind = source.source_type.as_str(),
                    title = source.title,
                    author = source.author.as_deref().unwrap_or(""),
                )
            })
            .collect();
        let findings_context: Vec<String> = raw_findings
            .iter()
            .enumerate()
            .map(|(i, finding)| {
                format!(
                    "[F{n}] ({cred:?} credibility) {content}",
                    n = i + 1,
                    cred = finding.credibility,
                    content = finding.content
                )
            })
            .collect();

        let prompt = format!(
            "Consolidate these sources and extracted findings into a comprehensive analysis \
             for the research query.\n\n\
             QUERY: {query}\n\n\
             SOURCES ({source_count} total):\n{sources}\n\n\
             EXTRACTED FINDINGS ({finding_count} total):\n{findings}\n\n\
             INSTRUCTIONS:\n\
             - Group related information into 4-8 consolidated findings\n\
             - EVERY finding must include specific data points or concrete evidence\n\
             - Include both areas of consensus and areas of debate\n\
             - Rate confidence based on number and quality of supporting sources\n\n\
             Respond in JSON format:\n\
             {{\"consolidated_findings\": [{{\"title\": \"...\", \"content\": \"...\", \
             \"finding_type\": \"fact|insight|statistic|trend|debate\", \
             \"source_refs\": [\"S1\"], \"confidence\": \"high|medium|low\"}}]}}",
            query = ctx.query,
            source_count = source_context.len(),
            sources = source_context.join("\n"),
            finding_count = findings_context.len(),
            findings = if findings_context.is_empty() {
                "No pre-extracted findings available - analyze directly from sources.".to_string()
            } else {
                findings_context.join("\n")
            },
        );
        let request = GenerateRequest::new(prompt, &ctx.config.models.analyst)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(0.5)
            .with_max_tokens(4096);

        match ctx.think(request).await {
            Ok(reply) => {
                if let Ok(findings) = json::extract_array(&reply, "consolidated_findings") {
                    if !findings.is_empty() {
                        return Ok(findings);
                    }
                }
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "consolidation failed");
            }
        }

        // Fallback: restructure the raw findings.
        if !raw_findings.is_empty() {
            return Ok(raw_findings
                .iter()
                .filter(|finding| !finding.content.is_empty())
                .map(|finding| {
                    let title: String = finding.content.chars().take(80).collect();
                    json!({
                        "title": title,
                        "content": finding.content,
                        "finding_type": "insight",
                        "source_refs": finding.source_refs,
                        "confidence": format!("{:?}", finding.credibility).to_lowercase(),
                    })
                })
                .collect());
        }

        // Last resort: generate findings directly from the sources.
        if !sources.is_empty() {
            return self.emergency_findings(ctx, sources).await;
        }
        Ok(Vec::new())
    }

    /// Emergency fallback when consolidation and raw findings both came up
    /// empty.
    async fn emergency_findings(&self, ctx: &AgentContext, sources: &[Source]) -> Result<Vec<Value>> {
        let source_text: Vec<String> = sources
            .iter()
            .take(30)
            .map(|source| {
                let snippet: String = source.snippet.chars().take(200).collect();
                format!("- {}: {}", source.title, snippet)
            })
            .collect();

        let prompt = format!(
            "Based on these sources, what can we learn about: {query}\n\n{text}\n\n\
             Extract 3-5 concrete findings. Each must contain specific information from the \
             sources.\nRespond in JSON:\n\
             {{\"consolidated_findings\": [{{\"title\": \"...\", \"content\": \"...\", \
             \"finding_type\": \"insight\", \"source_refs\": [], \"confidence\": \"medium\"}}]}}",
            query = ctx.query,
            text = source_text.join("\n"),
        );
        let request = GenerateRequest::new(prompt, &ctx.config.models.analyst)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(0.5)
            .with_max_tokens(2048);

        match ctx.think(request).await {
            Ok(reply) => Ok(json::extract_array(&reply, "consolidated_findings").unwrap_or_default()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "emergency findings extraction failed");
                Ok(Vec::new())
            }
        }
    }

    /// Identify 3-5 patterns across the consolidated findings.
    async fn identify_patterns(&self, ctx: &AgentContext, findings: &[Value]) -> Result<Vec<Value>> {
        if findings.is_empty() {
            return Ok(Vec::new());
        }
        let listing = findings_listing(findings);
        let prompt = format!(
            "Identify patterns and common themes across these research findings.\n\n\
             QUERY: {query}\n\nFINDINGS:\n{listing}\n\n\
             Identify 3-5 key patterns. Every pattern must be grounded in specific evidence \
             from the findings above; do not invent patterns the data does not support.\n\n\
             Respond in JSON:\n\
             {{\"patterns\": [{{\"name\": \"...\", \"description\": \"...\", \
             \"strength\": \"strong|moderate|weak\", \"supporting_findings\": [0, 1]}}]}}",
            query = ctx.query
        );
        let request = GenerateRequest::new(prompt, &ctx.config.models.analyst)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(0.5)
            .with_max_tokens(2048);

        match ctx.think(request).await {
            Ok(reply) => Ok(json::extract_array(&reply, "patterns").unwrap_or_default()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "pattern identification failed");
                Ok(Vec::new())
            }
        }
    }

    /// Detect conflicting claims; an empty list is a normal outcome.
    async fn detect_contradictions(
        &self,
        ctx: &AgentContext,
        findings: &[Value],
    ) -> Result<Vec<Value>> {
        if findings.len() < 2 {
            return Ok(Vec::new());
        }
        let listing = findings_listing(findings);
        let prompt = format!(
            "Analyze these findings for contradictions or conflicting claims.\n\n\
             FINDINGS:\n{listing}\n\n\
             For each contradiction: describe the conflict, identify which findings are \
             involved, and suggest which might be more reliable.\n\n\
             Respond in JSON:\n\
             {{\"contradictions\": [{{\"topic\": \"...\", \"finding_indices\": [0, 2], \
             \"claim_1\": \"...\", \"claim_2\": \"...\", \"analysis\": \"...\"}}]}}\n\n\
             If no significant contradictions exist, return an empty array."
        );
        let request = GenerateRequest::new(prompt, &ctx.config.models.analyst)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(0.5)
            .with_max_tokens(2048);

        match ctx.think(request).await {
            Ok(reply) => Ok(json::extract_array(&reply, "contradictions").unwrap_or_default()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "contradiction detection failed");
                Ok(Vec::new())
            }
        }
    }

    /// Extract the 5-7 most important insights as plain statements.
    async fn extract_insights(
        &self,
        ctx: &AgentContext,
        findings: &[Value],
        patterns: &[Value],
    ) -> Result<Vec<String>> {
        if findings.is_empty() {
            return Ok(Vec::new());
        }
        let findings_text: Vec<String> = findings
            .iter()
            .take(10)
            .map(|f| {
                format!(
                    "- {}: {}",
                    f["title"].as_str().unwrap_or(""),
                    truncated(f["content"].as_str().unwrap_or(""), 150)
                )
            })
            .collect();
        let patterns_text: Vec<String> = patterns
            .iter()
            .map(|p| {
                format!(
                    "- {}: {}",
                    p["name"].as_str().unwrap_or(""),
                    truncated(p["description"].as_str().unwrap_or(""), 100)
                )
            })
            .collect();

        let prompt = format!(
            "Based on this analysis, extract the 5-7 most important insights.\n\n\
             Query: {query}\n\nKey Findings:\n{findings}\n\nPatterns Identified:\n{patterns}\n\n\
             Each insight must be a clear, specific statement with the data that supports it. \
             List the insights in order of importance, one per line.",
            query = ctx.query,
            findings = findings_text.join("\n"),
            patterns = patterns_text.join("\n"),
        );
        let request = GenerateRequest::new(prompt, &ctx.config.models.analyst)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(0.5)
            .with_max_tokens(1536);

        match ctx.think(request).await {
            Ok(reply) => Ok(reply
                .lines()
                .map(|line| line.trim().trim_start_matches(['0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '.', '-', ')', ' ']))
                .filter(|line| line.len() > 10)
                .take(7)
                .map(ToString::to_string)
                .collect()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "insight extraction failed");
                Ok(Vec::new())
            }
        }
    }
}

/// Attach ids and pattern cross-links; pure bookkeeping, no LLM call.
fn organize_findings(findings: &[Value], patterns: &[Value]) -> Vec<Value> {
    findings
        .iter()
        .enumerate()
        .map(|(index, finding)| {
            let related: Vec<String> = patterns
                .iter()
                .filter(|pattern| {
                    pattern["supporting_findings"]
                        .as_array()
                        .is_some_and(|support| {
                            support.iter().any(|v| v.as_u64() == Some(index as u64))
                        })
                })
                .filter_map(|pattern| pattern["name"].as_str().map(ToString::to_string))
                .collect();
            json!({
                "id": format!("finding_{}", index + 1),
                "title": finding["title"],
                "content": finding["content"],
                "finding_type": finding.get("finding_type").cloned().unwrap_or(json!("insight")),
                "confidence": finding.get("confidence").cloned().unwrap_or(json!("medium")),
                "source_refs": finding.get("source_refs").cloned().unwrap_or(json!([])),
                "related_patterns": related,
                "agent": Stage::Analyze.as_str(),
            })
        })
        .collect()
}

fn findings_listing(findings: &[Value]) -> String {
    findings
        .iter()
        .enumerate()
        .map(|(index, finding)| {
            format!(
                "[{index}] {}: {}",
                finding["title"].as_str().unwrap_or("Finding"),
                truncated(finding["content"].as_str().unwrap_or(""), 200)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncated(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Report stage: assembles the final research report.
//!
//! Findings come from the store with a fallback chain (validated ->
//! organized -> consolidated -> raw) so a degraded verify stage never
//! leaves the report empty-handed. The rendered markdown carries numbered
//! citations in the configured style, and the quality score folds source
//! volume, verification ratio and overall confidence into a 0-5 scale.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use super::{AgentContext, PipelineAgent, Stage, StageOutput};
use crate::error::Result;
use crate::json;
use crate::llm::GenerateRequest;
use crate::models::{artifact, Report, ReportSection, Source};

const SYSTEM_PROMPT: &str = "You are an expert report writer who creates professional, \
data-rich research reports. Use clear language with specific data points, never placeholder \
text. Every claim must be backed by evidence from the research; if data is limited, \
acknowledge it honestly but still present what was found.";

/// At most this many sources are rendered as citations.
const CITATION_CAP: usize = 100;

/// Report agent.
pub struct ReportAgent;

#[async_trait]
impl PipelineAgent for ReportAgent {
    fn stage(&self) -> Stage {
        Stage::Report
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<StageOutput> {
        let sources = ctx.store.sources_list(&ctx.session_id).await?;
        let findings = load_findings(ctx).await?;
        let confidence_summary = ctx
            .store
            .pipeline_data_get(&ctx.session_id, artifact::CONFIDENCE_SUMMARY)
            .await?
            .unwrap_or(Value::Null);
        let insights = ctx
            .store
            .pipeline_data_get(&ctx.session_id, artifact::KEY_INSIGHTS)
            .await?
            .unwrap_or(json!([]));

        tracing::info!(
            session_id = %ctx.session_id,
            findings = findings.len(),
            sources = sources.len(),
            "report generation starting"
        );

        ctx.report(Stage::Report, "in_progress", 5, "Planning report structure...")
            .await;
        let title = self.generate_title(ctx).await?;

        ctx.report(Stage::Report, "in_progress", 20, "Structuring report sections...")
            .await;
        let section_titles = self.structure_sections(ctx, &findings).await?;

        ctx.report(Stage::Report, "in_progress", 40, "Writing report content...")
            .await;
        let mut sections = Vec::with_capacity(section_titles.len());
        for (index, section_title) in section_titles.iter().enumerate() {
            let content = self
                .write_section(ctx, section_title, &findings, &insights)
                .await?;
            sections.push(ReportSection {
                title: section_title.clone(),
                content,
                order: index + 1,
            });
        }

        ctx.report(Stage::Report, "in_progress", 70, "Creating executive summary...")
            .await;
        let summary = self.executive_summary(ctx, &sections, &confidence_summary).await?;

        ctx.report(Stage::Report, "in_progress", 85, "Rendering report...")
            .await;
        let markdown_content = render_markdown(
            &title,
            &summary,
            &sections,
            &sources,
            &ctx.params.citation_style,
        );

        let quality_score = quality_score(&sources, &findings, &confidence_summary);

        let report = Report {
            title,
            summary,
            markdown_content,
            sections,
            citation_style: ctx.params.citation_style.clone(),
            quality_score,
            generated_at: Utc::now(),
        };

        if let Err(e) = ctx.store.report_insert(&ctx.session_id, report.clone()).await {
            tracing::error!(session_id = %ctx.session_id, error = %e, "report persist failed; continuing");
        }
        ctx.persist_artifact(
            artifact::REPORT,
            serde_json::to_value(&report).unwrap_or(Value::Null),
        )
        .await;

        ctx.report(Stage::Report, "in_progress", 100, "Report generation complete")
            .await;

        Ok(StageOutput::Reported { quality_score })
    }
}

impl ReportAgent {
    async fn generate_title(&self, ctx: &AgentContext) -> Result<String> {
        let prompt = format!(
            "Generate a professional, concise report title for this research query.\n\n\
             Query: {query}\n\n\
             The title should be clear, professional, 5-12 words, without quotes or special \
             characters. Return only the title.",
            query = ctx.query
        );
        let request = GenerateRequest::new(prompt, &ctx.config.models.reporter)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(0.4)
            .with_max_tokens(64);

        match ctx.think(request).await {
            Ok(reply) => {
                let title = reply.trim().trim_matches(['"', '\'']).to_string();
                if title.is_empty() {
                    Ok(fallback_title(&ctx.query))
                } else {
                    Ok(title)
                }
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "title generation failed");
                Ok(fallback_title(&ctx.query))
            }
        }
    }

    /// Section titles, always bracketed by Methodology and Conclusions.
    async fn structure_sections(&self, ctx: &AgentContext, findings: &[Value]) -> Result<Vec<String>> {
        let mut titles: Vec<String> = Vec::new();

        if !findings.is_empty() {
            let listing: Vec<String> = findings
                .iter()
                .take(15)
                .map(|finding| {
                    format!("- {}", finding["title"].as_str().unwrap_or("Finding"))
                })
                .collect();
            let prompt = format!(
                "Group these research findings into 3-5 logical report sections.\n\n\
                 QUERY: {query}\n\nFINDINGS:\n{listing}\n\n\
                 Respond in JSON: {{\"sections\": [\"Section title\", ...]}}",
                query = ctx.query,
                listing = listing.join("\n"),
            );
            let request = GenerateRequest::new(prompt, &ctx.config.models.reporter)
                .with_system_prompt(SYSTEM_PROMPT)
                .with_temperature(0.4)
                .with_max_tokens(512);

            match ctx.think(request).await {
                Ok(reply) => {
                    if let Ok(items) = json::extract_array(&reply, "sections") {
                        titles = items
                            .into_iter()
                            .filter_map(|item| item.as_str().map(ToString::to_string))
                            .take(5)
                            .collect();
                    }
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(session_id = %ctx.session_id, error = %e, "section structuring failed");
                }
            }
        }

        if titles.is_empty() {
            titles.push("Key Findings".to_string());
        }
        if !titles.iter().any(|t| t.to_lowercase().contains("method")) {
            titles.insert(0, "Research Methodology".to_string());
        }
        if !titles.iter().any(|t| t.to_lowercase().contains("conclusion")) {
            titles.push("Conclusions and Recommendations".to_string());
        }
        Ok(titles)
    }

    async fn write_section(
        &self,
        ctx: &AgentContext,
        section_title: &str,
        findings: &[Value],
        insights: &Value,
    ) -> Result<String> {
        let findings_text: Vec<String> = findings
            .iter()
            .take(12)
            .map(|finding| {
                let content: String = finding["content"]
                    .as_str()
                    .unwrap_or("")
                    .chars()
                    .take(300)
                    .collect();
                format!("- {}: {}", finding["title"].as_str().unwrap_or("Finding"), content)
            })
            .collect();
        let insights_text = insights
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| format!("- {s}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let prompt = format!(
            "Write the \"{section_title}\" section of a research report.\n\n\
             QUERY: {query}\n\nFINDINGS:\n{findings}\n\nKEY INSIGHTS:\n{insights}\n\n\
             Write 2-4 paragraphs of clear, professional prose with specific data points. \
             No headings, no placeholder text. Return only the section body.",
            query = ctx.query,
            findings = findings_text.join("\n"),
            insights = insights_text,
        );
        let request = GenerateRequest::new(prompt, &ctx.config.models.reporter)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(0.4)
            .with_max_tokens(2048);

        match ctx.think(request).await {
            Ok(reply) => Ok(reply.trim().to_string()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(
                    session_id = %ctx.session_id,
                    section = section_title,
                    error = %e,
                    "section writing failed; using finding digest"
                );
                Ok(findings_text.join("\n"))
            }
        }
    }

    async fn executive_summary(
        &self,
        ctx: &AgentContext,
        sections: &[ReportSection],
        confidence_summary: &Value,
    ) -> Result<String> {
        let digest: Vec<String> = sections
            .iter()
            .map(|section| {
                let content: String = section.content.chars().take(300).collect();
                format!("{}: {}", section.title, content)
            })
            .collect();
        let confidence_level = confidence_summary["confidence_level"]
            .as_str()
            .unwrap_or("medium");

        let prompt = format!(
            "Write an executive summary (1-2 paragraphs) for this research report.\n\n\
             QUERY: {query}\n\nSECTIONS:\n{digest}\n\n\
             Overall confidence level: {confidence_level}.\n\
             Lead with the most important conclusion and include key statistics. \
             Return only the summary text.",
            query = ctx.query,
            digest = digest.join("\n"),
        );
        let request = GenerateRequest::new(prompt, &ctx.config.models.reporter)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(0.4)
            .with_max_tokens(1024);

        match ctx.think(request).await {
            Ok(reply) => Ok(reply.trim().to_string()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "summary generation failed");
                Ok(format!(
                    "This report presents research findings for: {query}. Overall confidence \
                     level: {confidence_level}.",
                    query = ctx.query,
                ))
            }
        }
    }
}

/// Findings for the report, through the full fallback chain.
async fn load_findings(ctx: &AgentContext) -> Result<Vec<Value>> {
    for key in [
        artifact::VALIDATED_FINDINGS,
        artifact::ORGANIZED_FINDINGS,
        artifact::CONSOLIDATED_FINDINGS,
    ] {
        if let Some(Value::Array(findings)) = ctx.store.pipeline_data_get(&ctx.session_id, key).await? {
            if !findings.is_empty() {
                return Ok(findings);
            }
        }
    }
    let raw = ctx.store.findings_list(&ctx.session_id).await?;
    Ok(raw
        .into_iter()
        .filter_map(|finding| serde_json::to_value(finding).ok())
        .collect())
}

fn fallback_title(query: &str) -> String {
    let truncated: String = query.chars().take(50).collect();
    format!("Research Report: {truncated}")
}

/// quality = clamp(0, 5, 1.5*min(sources/100, 1) + 2.0*verified_ratio +
/// 1.5*overall_confidence)
fn quality_score(sources: &[Source], findings: &[Value], confidence_summary: &Value) -> f64 {
    let source_factor = (sources.len() as f64 / 100.0).min(1.0);
    let verified = findings
        .iter()
        .filter(|finding| finding["verified"].as_bool().unwrap_or(false))
        .count();
    let verified_ratio = if findings.is_empty() {
        0.0
    } else {
        verified as f64 / findings.len() as f64
    };
    let overall_confidence = confidence_summary["overall_confidence"]
        .as_f64()
        .or_else(|| confidence_summary["overall"].as_f64())
        .unwrap_or(0.0);

    (1.5 * source_factor + 2.0 * verified_ratio + 1.5 * overall_confidence).clamp(0.0, 5.0)
}

fn render_markdown(
    title: &str,
    summary: &str,
    sections: &[ReportSection],
    sources: &[Source],
    citation_style: &str,
) -> String {
    let mut output = format!("# {title}\n\n## Executive Summary\n\n{summary}\n\n");

    for section in sections {
        output.push_str(&format!("## {}\n\n{}\n\n", section.title, section.content));
    }

    if !sources.is_empty() {
        output.push_str("## References\n\n");
        for (index, source) in sources.iter().take(CITATION_CAP).enumerate() {
            output.push_str(&format!("{}. {}\n", index + 1, format_citation(source, citation_style)));
        }
    }
    output
}

/// Minimal citation formatting per style; the URL always appears so the
/// reference is actionable.
fn format_citation(source: &Source, style: &str) -> String {
    let author = source.author.as_deref().unwrap_or("");
    let year = source
        .published_at
        .as_deref()
        .and_then(|date| date.get(..4))
        .unwrap_or("n.d.");

    match style.to_uppercase().as_str() {
        "MLA" => {
            if author.is_empty() {
                format!("\"{}\". {}. {}", source.title, source.provider, source.url)
            } else {
                format!("{}. \"{}\". {}. {}", author, source.title, source.provider, source.url)
            }
        }
        "CHICAGO" => {
            if author.is_empty() {
                format!("\"{}\". Accessed via {}. {}", source.title, source.provider, source.url)
            } else {
                format!("{}. \"{}\". {}. {}", author, source.title, year, source.url)
            }
        }
        // APA default
        _ => {
            if author.is_empty() {
                format!("{}. ({}). {}", source.title, year, source.url)
            } else {
                format!("{}. ({}). {}. {}", author, year, source.title, source.url)
            }
        }
    }
}

// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Clarify stage: query analysis and research planning.
//!
//! The LLM may propose a clarified variant of the query, but that variant
//! is stored only as a search hint - the session's original query is
//! never replaced. The stage also persists a research plan that the
//! supervised clarify checkpoint shows to the human reviewer.

use async_trait::async_trait;
use serde_json::json;

use super::{AgentContext, PipelineAgent, Stage, StageOutput};
use crate::error::Result;
use crate::llm::GenerateRequest;
use crate::models::artifact;

const SYSTEM_PROMPT: &str = "You represent human oversight in a research pipeline. \
Clarify ambiguous queries, keep the research direction aligned with user intent, \
and suggest improvements to scope. Ask nothing of the user directly; produce \
structured analysis only.";

/// Clarify agent.
pub struct ClarifyAgent;

/// Parsed query analysis, line-format reply.
#[derive(Debug, Clone)]
struct QueryAnalysis {
    clarity: String,
    objective: String,
    clarified_query: String,
}

#[async_trait]
impl PipelineAgent for ClarifyAgent {
    fn stage(&self) -> Stage {
        Stage::Clarify
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<StageOutput> {
        ctx.report(Stage::Clarify, "in_progress", 10, "Analyzing research query...")
            .await;

        let analysis = self.analyze_query(ctx).await?;

        ctx.report(Stage::Clarify, "in_progress", 50, "Generating research plan...")
            .await;

        let plan = build_plan(ctx, &analysis);
        ctx.persist_artifact(artifact::RESEARCH_PLAN, plan).await;

        // The clarified variant is a search hint at most; the original
        // query stays authoritative.
        let search_hint = if analysis.clarified_query.is_empty()
            || analysis.clarified_query == ctx.query
        {
            None
        } else {
            Some(analysis.clarified_query.clone())
        };
        if let Some(hint) = &search_hint {
            ctx.persist_artifact(artifact::SEARCH_HINT, json!(hint)).await;
        }

        ctx.report(Stage::Clarify, "in_progress", 90, "Research parameters finalized")
            .await;

        tracing::info!(
            session_id = %ctx.session_id,
            clarity = %analysis.clarity,
            has_hint = search_hint.is_some(),
            "query clarification complete"
        );

        Ok(StageOutput::Clarified { search_hint })
    }
}

impl ClarifyAgent {
    async fn analyze_query(&self, ctx: &AgentContext) -> Result<QueryAnalysis> {
        let prompt = format!(
            "Analyze this research query for clarity and completeness.\n\n\
             QUERY: {query}\n\n\
             Evaluate:\n\
             1. Is the query clear and specific?\n\
             2. What is the main research objective?\n\
             3. Are there ambiguities that need clarification?\n\
             4. Suggest a slightly clarified version ONLY if genuinely unclear.\n\n\
             CRITICAL RULES for CLARIFIED_QUERY:\n\
             - Keep the EXACT SAME TOPIC as the original query.\n\
             - Do NOT invent a new topic, broaden it, or replace it with a generic question.\n\
             - If the query is already clear, return it UNCHANGED.\n\
             - Only rephrase for search optimization (typos, precision).\n\n\
             Respond in this format:\n\
             CLARITY: [clear/somewhat_clear/unclear]\n\
             OBJECTIVE: [main research objective]\n\
             CLARIFIED_QUERY: [the original query, only rephrased if genuinely needed]",
            query = ctx.query
        );

        let request = GenerateRequest::new(prompt, &ctx.config.models.researcher)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(0.3)
            .with_max_tokens(1000);

        match ctx.think(request).await {
            Ok(reply) => Ok(parse_analysis(&reply, &ctx.query)),
            // Cancellation must reach the orchestrator; every other LLM
            // failure is tolerated here.
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "query analysis failed; using query as-is");
                Ok(QueryAnalysis {
                    clarity: "clear".to_string(),
                    objective: ctx.query.clone(),
                    clarified_query: ctx.query.clone(),
                })
            }
        }
    }
}

fn parse_analysis(reply: &str, original_query: &str) -> QueryAnalysis {
    let mut analysis = QueryAnalysis {
        clarity: "clear".to_string(),
        objective: original_query.to_string(),
        clarified_query: original_query.to_string(),
    };

    for line in reply.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("CLARITY:") {
            analysis.clarity = value.trim().to_lowercase();
        } else if let Some(value) = line.strip_prefix("OBJECTIVE:") {
            analysis.objective = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("CLARIFIED_QUERY:") {
            let value = value.trim();
            if !value.is_empty() {
                analysis.clarified_query = value.to_string();
            }
        }
    }
    analysis
}

fn build_plan(ctx: &AgentContext, analysis: &QueryAnalysis) -> serde_json::Value {
    let focus_areas = if ctx.params.focus_areas.is_empty() {
        vec!["general".to_string()]
    } else {
        ctx.params.focus_areas.clone()
    };
    json!({
        "query": ctx.query,
        "objective": analysis.objective,
        "clarity": analysis.clarity,
        "focus_areas": focus_areas,
        "source_preferences": ctx.params.source_preferences,
        "research_phases": [
            {"phase": 1, "name": "Information Gathering", "stage": Stage::Retrieve.as_str()},
            {"phase": 2, "name": "Analysis & Synthesis", "stage": Stage::Analyze.as_str()},
            {"phase": 3, "name": "Verification", "stage": Stage::Verify.as_str()},
            {"phase": 4, "name": "Report Generation", "stage": Stage::Report.as_str()},
        ],
        "max_sources": ctx.params.max_sources,
    })
}

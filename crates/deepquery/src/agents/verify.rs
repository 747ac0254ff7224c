// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Verify stage: cross-referencing, credibility scoring, statistical
//! verification and bias analysis.
//!
//! This is the pipeline's only degradation-tolerant stage: the
//! orchestrator absorbs a failure here into a fallback confidence
//! summary and continues to the report. Within the stage, each
//! sub-verification tolerates its own LLM failures by recording a
//! neutral result.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use super::{AgentContext, PipelineAgent, Stage, StageOutput};
use crate::credibility::{self, CredibilityAssessment};
use crate::error::Result;
use crate::json;
use crate::llm::GenerateRequest;
use crate::models::{artifact, Source};

const SYSTEM_PROMPT: &str = "You are a rigorous fact-checker who verifies claims with \
precision. Cross-reference claims against independent sources, verify statistics, assess \
source credibility, flag potentially misleading information, and mark uncertainty clearly - \
it is better to say unverified than to guess.";

/// Cross-reference each finding against at most this many sources.
const CROSS_REFERENCE_SOURCES: usize = 25;

/// Credibility heuristics run over at most this many sources.
const CREDIBILITY_SOURCES: usize = 30;

/// Statistical verification consults at most this many sources.
const STATS_SOURCES: usize = 10;

/// Bias analysis samples at most this many sources.
const BIAS_SAMPLE: usize = 10;

/// Verify agent.
pub struct VerifyAgent;

#[async_trait]
impl PipelineAgent for VerifyAgent {
    fn stage(&self) -> Stage {
        Stage::Verify
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<StageOutput> {
        let sources = ctx.store.sources_list(&ctx.session_id).await?;
        let findings = load_findings(ctx).await?;

        tracing::info!(
            session_id = %ctx.session_id,
            findings = findings.len(),
            sources = sources.len(),
            "verification starting"
        );

        ctx.report(Stage::Verify, "in_progress", 5, "Beginning fact-checking process...")
            .await;

        ctx.report(Stage::Verify, "in_progress", 10, "Assessing source credibility...")
            .await;
        let assessments: Vec<CredibilityAssessment> = sources
            .iter()
            .take(CREDIBILITY_SOURCES)
            .map(|source| credibility::assess_url(&source.url))
            .collect();

        ctx.report(Stage::Verify, "in_progress", 30, "Validating findings against sources...")
            .await;
        let validated = self.validate_findings(ctx, &findings, &sources).await?;

        ctx.report(Stage::Verify, "in_progress", 55, "Verifying statistics and claims...")
            .await;
        let stats = self.verify_statistics(ctx, &findings, &sources).await?;

        ctx.report(Stage::Verify, "in_progress", 70, "Detecting potential bias...")
            .await;
        let bias = self.analyze_bias(ctx, &sources).await?;

        ctx.report(Stage::Verify, "in_progress", 85, "Calculating confidence scores...")
            .await;
        let summary = confidence_summary(&validated, &assessments, &stats);

        let verified_count = validated
            .iter()
            .filter(|finding| finding["verified"].as_bool().unwrap_or(false))
            .count();
        let overall_confidence = summary["overall_confidence"].as_f64().unwrap_or(0.5);

        ctx.persist_artifact(artifact::VALIDATED_FINDINGS, Value::Array(validated.clone()))
            .await;
        ctx.persist_artifact(artifact::STATISTICS_VERIFICATION, json!(stats)).await;
        ctx.persist_artifact(artifact::BIAS_ANALYSIS, json!(bias)).await;
        ctx.persist_artifact(artifact::CONFIDENCE_SUMMARY, summary).await;

        ctx.report(
            Stage::Verify,
            "in_progress",
            100,
            format!("Fact-checking complete: {verified_count} findings verified"),
        )
        .await;

        Ok(StageOutput::Verified {
            verified_count,
            total_findings: validated.len(),
            overall_confidence,
        })
    }
}

impl VerifyAgent {
    /// Cross-reference each finding against the sources via the LLM.
    async fn validate_findings(
        &self,
        ctx: &AgentContext,
        findings: &[Value],
        sources: &[Source],
    ) -> Result<Vec<Value>> {
        let mut validated = Vec::with_capacity(findings.len());

        for (index, finding) in findings.iter().enumerate() {
            let content = finding_content(finding);
            if content.is_empty() {
                let mut annotated = finding.clone();
                merge(&mut annotated, json!({"verified": false, "confidence_score": 0.3}));
                validated.push(annotated);
                continue;
            }

            let verification = match self.cross_reference(ctx, &content, sources).await {
                Ok(verification) => verification,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(session_id = %ctx.session_id, error = %e, "finding validation failed");
                    json!({
                        "verified": false,
                        "verdict": "error",
                        "confidence": 0.5,
                        "supporting_sources": [],
                        "contradicting_sources": [],
                    })
                }
            };

            let mut annotated = finding.clone();
            merge(
                &mut annotated,
                json!({
                    "verified": verification["verified"],
                    "verification_verdict": verification["verdict"],
                    "confidence_score": verification["confidence"],
                    "supporting_sources": verification["supporting_sources"],
                    "contradicting_sources": verification["contradicting_sources"],
                    "verification_summary": verification.get("summary").cloned().unwrap_or(json!("")),
                }),
            );
            validated.push(annotated);

            let progress = 30 + ((index as f64 / findings.len() as f64) * 25.0) as u8;
            ctx.report(
                Stage::Verify,
                "in_progress",
                progress,
                format!("Validated {}/{} findings...", index + 1, findings.len()),
            )
            .await;
        }
        Ok(validated)
    }

    /// One claim against up to 25 sources. Returns
    /// `{verified, verdict, confidence, supporting_sources,
    /// contradicting_sources, summary}` with refs resolved to
    /// `{title, url}`.
    async fn cross_reference(
        &self,
        ctx: &AgentContext,
        claim: &str,
        sources: &[Source],
    ) -> Result<Value> {
        let considered = &sources[..sources.len().min(CROSS_REFERENCE_SOURCES)];
        let listing: Vec<String> = considered
            .iter()
            .enumerate()
            .map(|(i, source)| {
                let snippet: String = source.snippet.chars().take(400).collect();
                format!("Source {n} ({title}):\n{snippet}", n = i + 1, title = source.title)
            })
            .collect();

        let prompt = format!(
            "Analyze whether the following sources support, contradict, or are neutral to \
             this claim.\n\nCLAIM: {claim}\n\nSOURCES:\n{listing}\n\n\
             Respond in JSON format:\n\
             {{\"analysis\": [{{\"source_index\": 1, \"verdict\": \
             \"supports|contradicts|neutral\"}}], \"overall_verdict\": \
             \"verified|partially_verified|unverified|contradicted\", \
             \"confidence\": 0.0, \"summary\": \"...\"}}",
            listing = listing.join("\n\n"),
        );
        let request = GenerateRequest::new(prompt, &ctx.config.models.verifier)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(0.2)
            .with_max_tokens(1500);

        let reply = ctx.think(request).await?;
        let parsed = json::extract_object(&reply)?;

        let mut supporting = Vec::new();
        let mut contradicting = Vec::new();
        if let Some(Value::Array(items)) = parsed.get("analysis") {
            for item in items {
                let Some(index) = item["source_index"].as_u64() else {
                    continue;
                };
                let Some(source) = index
                    .checked_sub(1)
                    .and_then(|i| considered.get(i as usize))
                else {
                    continue;
                };
                let reference = json!({"title": source.title, "url": source.url});
                match item["verdict"].as_str() {
                    Some("supports") => supporting.push(reference),
                    Some("contradicts") => contradicting.push(reference),
                    _ => {}
                }
            }
        }

        let verdict = parsed
            .get("overall_verdict")
            .and_then(Value::as_str)
            .unwrap_or("unverified");
        Ok(json!({
            "verified": matches!(verdict, "verified" | "partially_verified"),
            "verdict": verdict,
            "confidence": parsed.get("confidence").and_then(Value::as_f64).unwrap_or(0.5),
            "supporting_sources": supporting,
            "contradicting_sources": contradicting,
            "summary": parsed.get("summary").cloned().unwrap_or(json!("")),
        }))
    }

    /// Verify statistical claims in findings containing numeric tokens.
    async fn verify_statistics(
        &self,
        ctx: &AgentContext,
        findings: &[Value],
        sources: &[Source],
    ) -> Result<Vec<Value>> {
        // Unwrap is safe on a constant pattern, but keep the lint happy.
        let Ok(numeric) = Regex::new(r"\d+(?:\.\d+)?%?") else {
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        for finding in findings {
            let content = finding_content(finding);
            if !numeric.is_match(&content) {
                continue;
            }

            match self.verify_one_statistic(ctx, &content, sources).await {
                Ok(result) => results.push(result),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(session_id = %ctx.session_id, error = %e, "statistics verification failed");
                }
            }
        }
        Ok(results)
    }

    async fn verify_one_statistic(
        &self,
        ctx: &AgentContext,
        claim: &str,
        sources: &[Source],
    ) -> Result<Value> {
        let listing: Vec<String> = sources
            .iter()
            .take(STATS_SOURCES)
            .enumerate()
            .map(|(i, source)| {
                let snippet: String = source.snippet.chars().take(400).collect();
                format!("Source {}: {snippet}", i + 1)
            })
            .collect();

        let truncated_claim: String = claim.chars().take(200).collect();
        let prompt = format!(
            "Verify this statistical claim against the provided sources.\n\n\
             STATISTICAL CLAIM: {truncated_claim}\n\nSOURCES:\n{listing}\n\n\
             Respond in JSON:\n\
             {{\"verified\": false, \"confidence\": 0.0, \
             \"found_values\": [], \"discrepancies\": [], \"notes\": \"...\"}}",
            listing = listing.join("\n\n"),
        );
        let request = GenerateRequest::new(prompt, &ctx.config.models.verifier)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(0.2)
            .with_max_tokens(1000);

        let reply = ctx.think(request).await?;
        let parsed = json::extract_object(&reply)?;
        Ok(json!({
            "claim": truncated_claim,
            "verified": parsed.get("verified").and_then(Value::as_bool).unwrap_or(false),
            "confidence": parsed.get("confidence").and_then(Value::as_f64).unwrap_or(0.5),
            "found_values": parsed.get("found_values").cloned().unwrap_or(json!([])),
            "discrepancies": parsed.get("discrepancies").cloned().unwrap_or(json!([])),
            "notes": parsed.get("notes").cloned().unwrap_or(json!("")),
        }))
    }

    /// Sample up to 10 sources and aggregate their bias scores.
    async fn analyze_bias(
        &self,
        ctx: &AgentContext,
        sources: &[Source],
    ) -> Result<credibility::BiasAnalysis> {
        let mut scores = Vec::new();
        let mut types = Vec::new();

        for source in sources.iter().take(BIAS_SAMPLE) {
            if source.snippet.is_empty() {
                continue;
            }
            let excerpt: String = source.snippet.chars().take(2000).collect();
            let prompt = format!(
                "Analyze the following text for potential bias.\n\nTEXT:\n{excerpt}\n\n\
                 Evaluate political slant, emotional vs objective language, missing \
                 perspectives and loaded framing.\n\nRespond in JSON:\n\
                 {{\"bias_score\": 0.0, \"bias_types\": []}}"
            );
            let request = GenerateRequest::new(prompt, &ctx.config.models.verifier)
                .with_system_prompt(SYSTEM_PROMPT)
                .with_temperature(0.3)
                .with_max_tokens(800);

            match ctx.think(request).await {
                Ok(reply) => {
                    if let Ok(parsed) = json::extract_object(&reply) {
                        scores.push(
                            parsed.get("bias_score").and_then(Value::as_f64).unwrap_or(0.5),
                        );
                        if let Some(Value::Array(labels)) = parsed.get("bias_types") {
                            types.extend(
                                labels.iter().filter_map(Value::as_str).map(ToString::to_string),
                            );
                        }
                    }
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(session_id = %ctx.session_id, error = %e, "bias detection failed");
                }
            }
        }

        Ok(credibility::aggregate_bias(&scores, types))
    }
}

/// Findings to verify: organized, falling back to consolidated, then raw.
async fn load_findings(ctx: &AgentContext) -> Result<Vec<Value>> {
    for key in [artifact::ORGANIZED_FINDINGS, artifact::CONSOLIDATED_FINDINGS] {
        if let Some(Value::Array(findings)) = ctx.store.pipeline_data_get(&ctx.session_id, key).await? {
            if !findings.is_empty() {
                return Ok(findings);
            }
        }
    }
    let raw = ctx.store.findings_list(&ctx.session_id).await?;
    Ok(raw
        .into_iter()
        .map(|finding| serde_json::to_value(finding).unwrap_or(Value::Null))
        .filter(|value| !value.is_null())
        .collect())
}

fn finding_content(finding: &Value) -> String {
    finding["content"]
        .as_str()
        .or_else(|| finding["title"].as_str())
        .unwrap_or("")
        .to_string()
}

fn merge(target: &mut Value, extra: Value) {
    if let (Value::Object(target_map), Value::Object(extra_map)) = (target, extra) {
        for (key, value) in extra_map {
            target_map.insert(key, value);
        }
    }
}

/// Weighted confidence: 0.40 finding confidence, 0.35 source credibility,
/// 0.25 statistics accuracy; bucketed high > 0.75, medium > 0.5, else low.
fn confidence_summary(
    validated: &[Value],
    assessments: &[CredibilityAssessment],
    stats: &[Value],
) -> Value {
    let finding_scores: Vec<f64> = validated
        .iter()
        .map(|finding| finding["confidence_score"].as_f64().unwrap_or(0.5))
        .collect();
    let finding_confidence = mean_or(&finding_scores, 0.5);

    let credibility_scores: Vec<f64> = assessments
        .iter()
        .map(|assessment| assessment.credibility_score)
        .collect();
    let source_credibility = mean_or(&credibility_scores, 0.5);

    let stats_accuracy = if stats.is_empty() {
        1.0
    } else {
        let verified = stats
            .iter()
            .filter(|stat| stat["verified"].as_bool().unwrap_or(false))
            .count();
        verified as f64 / stats.len() as f64
    };

    let overall = finding_confidence * 0.40 + source_credibility * 0.35 + stats_accuracy * 0.25;
    let level = if overall > 0.75 {
        "high"
    } else if overall > 0.5 {
        "medium"
    } else {
        "low"
    };

    let verified_findings = validated
        .iter()
        .filter(|finding| finding["verified"].as_bool().unwrap_or(false))
        .count();

    json!({
        "overall_confidence": round2(overall),
        "finding_confidence": round2(finding_confidence),
        "source_credibility": round2(source_credibility),
        "statistics_accuracy": round2(stats_accuracy),
        "verified_findings": verified_findings,
        "total_findings": validated.len(),
        "confidence_level": level,
    })
}

fn mean_or(values: &[f64], default: f64) -> f64 {
    if values.is_empty() {
        default
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_formula() {
        let validated = vec![
            json!({"verified": true, "confidence_score": 0.9}),
            json!({"verified": false, "confidence_score": 0.5}),
        ];
        let assessments = vec![credibility::assess_url("https://www.epa.gov/x")];
        let stats = vec![json!({"verified": true}), json!({"verified": false})];

        let summary = confidence_summary(&validated, &assessments, &stats);
        // 0.40*0.7 + 0.35*0.95 + 0.25*0.5 = 0.7375 -> medium
        let overall = summary["overall_confidence"].as_f64().unwrap();
        assert!((overall - 0.74).abs() < 0.011);
        assert_eq!(summary["confidence_level"], "medium");
        assert_eq!(summary["verified_findings"], 1);
        assert_eq!(summary["total_findings"], 2);
    }

    #[test]
    fn test_confidence_empty_inputs() {
        let summary = confidence_summary(&[], &[], &[]);
        // 0.40*0.5 + 0.35*0.5 + 0.25*1.0 = 0.625 -> medium
        assert!((summary["overall_confidence"].as_f64().unwrap() - 0.63).abs() < 0.011);
        assert_eq!(summary["confidence_level"], "medium");
    }

    #[test]
    fn test_confidence_buckets() {
        let high = vec![json!({"verified": true, "confidence_score": 1.0})];
        let assessments = vec![credibility::assess_url("https://www.nature.com/a")];
        let summary = confidence_summary(&high, &assessments, &[]);
        // 0.40*1.0 + 0.35*0.95 + 0.25*1.0 = 0.9825 -> high
        assert_eq!(summary["confidence_level"], "high");

        let low = vec![json!({"verified": false, "confidence_score": 0.1})];
        let bad = vec![credibility::assess_url("not a url")];
        let stats = vec![json!({"verified": false})];
        let summary = confidence_summary(&low, &bad, &stats);
        // 0.40*0.1 + 0.35*0.3 + 0.25*0.0 = 0.145 -> low
        assert_eq!(summary["confidence_level"], "low");
    }

    #[test]
    fn test_merge_annotates() {
        let mut finding = json!({"title": "A", "content": "c"});
        merge(&mut finding, json!({"verified": true}));
        assert_eq!(finding["verified"], true);
        assert_eq!(finding["title"], "A");
    }

    #[test]
    fn test_finding_content_fallback() {
        assert_eq!(finding_content(&json!({"content": "c"})), "c");
        assert_eq!(finding_content(&json!({"title": "t"})), "t");
        assert_eq!(finding_content(&json!({})), "");
    }
}

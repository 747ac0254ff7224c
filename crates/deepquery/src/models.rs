// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Core data model: sessions, sources, findings, reports and the
//! progress events streamed to subscribers.
//!
//! The external store owns durable documents; the orchestrator owns only
//! the in-flight state of a single run. Sources and findings are
//! append-only within a run, and a session's original `query` is never
//! overwritten once created.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::Stage;
use crate::constants::DEFAULT_MAX_SOURCES;

/// Lifecycle status of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not yet started.
    Initialized,
    /// The orchestrator loop is driving the pipeline.
    Running,
    /// Waiting at a supervised checkpoint.
    Paused,
    /// All stages finished.
    Completed,
    /// A fatal stage failure terminated the run.
    Failed,
    /// An external cancel signal terminated the run.
    Cancelled,
    /// The clarify checkpoint was explicitly rejected.
    Rejected,
}

impl SessionStatus {
    /// Whether this status is terminal. No transition leaves a terminal
    /// status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Failed
                | SessionStatus::Cancelled
                | SessionStatus::Rejected
        )
    }

    /// Stable string form used in progress events and persisted documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initialized => "initialized",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Rejected => "rejected",
        }
    }
}

/// Execution mode for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchMode {
    /// Full autonomous execution.
    #[default]
    Auto,
    /// Pause at checkpoints for human approval.
    Supervised,
}

/// How wide the retrieval stage casts its net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    /// Up to 8 query variants, 45 sources extracted.
    #[default]
    Standard,
    /// Up to 12 query variants, 60 sources extracted, doubled per-provider caps.
    Deep,
}

/// Caller-supplied parameters for a research session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchParams {
    /// Specific areas to emphasize; each becomes a query variant.
    #[serde(default)]
    pub focus_areas: Vec<String>,
    /// Preferred source types (advisory).
    #[serde(default)]
    pub source_preferences: Vec<String>,
    /// Cap on persisted sources.
    pub max_sources: usize,
    /// Auto or supervised execution.
    #[serde(default)]
    pub mode: ResearchMode,
    /// Standard or deep retrieval.
    #[serde(default)]
    pub depth: ResearchDepth,
    /// Output format for the report ("markdown", "html").
    pub report_format: String,
    /// Citation style ("APA", "MLA", "Chicago").
    pub citation_style: String,
}

impl Default for ResearchParams {
    fn default() -> Self {
        Self {
            focus_areas: Vec::new(),
            source_preferences: Vec::new(),
            max_sources: DEFAULT_MAX_SOURCES,
            mode: ResearchMode::Auto,
            depth: ResearchDepth::Standard,
            report_format: "markdown".to_string(),
            citation_style: "APA".to_string(),
        }
    }
}

/// Per-stage execution snapshot recorded on the session document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageState {
    /// "idle", "in_progress", "completed", "failed", "awaiting_approval".
    pub status: String,
    /// 0-100 within the stage.
    pub progress: u8,
    /// Last human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error text, when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One end-to-end pipeline execution identified by a stable id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id.
    pub id: String,
    /// The caller's research query. Immutable after creation; downstream
    /// stages may only attach a search hint, never replace this.
    pub query: String,
    /// Caller-supplied parameters.
    pub params: ResearchParams,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Name of the stage currently executing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    /// Per-stage snapshots, keyed by stage name.
    #[serde(default)]
    pub stage_states: HashMap<String, StageState>,
    /// Weighted overall progress, 0-100, monotonic within a run.
    pub overall_progress: u8,
    /// Persisted source count, by provider name plus "total".
    #[serde(default)]
    pub sources_count: HashMap<String, usize>,
    /// Persisted finding count.
    #[serde(default)]
    pub findings_count: usize,
    /// Stage names executed so far, in order.
    #[serde(default)]
    pub agents_executed: Vec<String>,
    /// Non-fatal errors accumulated during the run.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Terminal error message, if the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the orchestrator started the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a new session in the `Initialized` state.
    pub fn new(id: impl Into<String>, query: impl Into<String>, params: ResearchParams) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            params,
            status: SessionStatus::Initialized,
            current_phase: None,
            stage_states: HashMap::new(),
            overall_progress: 0,
            sources_count: HashMap::new(),
            findings_count: 0,
            agents_executed: Vec::new(),
            errors: Vec::new(),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Category of a retrieved source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// General web result.
    Web,
    /// News article.
    News,
    /// Academic paper.
    Academic,
    /// Encyclopedia entry.
    Encyclopedia,
    /// Anything else.
    #[default]
    Other,
}

impl SourceType {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Web => "web",
            SourceType::News => "news",
            SourceType::Academic => "academic",
            SourceType::Encyclopedia => "encyclopedia",
            SourceType::Other => "other",
        }
    }
}

/// A de-duplicated candidate document, URL-keyed within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Document title.
    pub title: String,
    /// Document URL; unique within a session after dedup.
    pub url: String,
    /// Short excerpt or abstract.
    pub snippet: String,
    /// Name of the provider that returned this source.
    pub provider: String,
    /// Source category.
    pub source_type: SourceType,
    /// Author, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Publication date string, provider-specific precision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    /// Credibility score in [0, 1].
    pub credibility_score: f64,
    /// Provider-specific metadata blob.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Provisional credibility assigned at extraction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credibility {
    /// Strong multi-source support expected.
    High,
    /// Typical single-source claim.
    #[default]
    Medium,
    /// Weak or speculative.
    Low,
}

impl Credibility {
    /// Parse a lenient textual label.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => Credibility::High,
            "low" => Credibility::Low,
            _ => Credibility::Medium,
        }
    }
}

/// A `{title, url}` reference resolved from a numeric source tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Title of the referenced source.
    pub title: String,
    /// URL of the referenced source.
    pub url: String,
}

/// A claim extracted from one or more sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// The claim text.
    pub content: String,
    /// Provisional credibility from extraction.
    pub credibility: Credibility,
    /// Resolved source references.
    #[serde(default)]
    pub source_refs: Vec<SourceRef>,
    /// Which agent produced this finding.
    pub agent: String,
    /// Set by the verify stage.
    #[serde(default)]
    pub verified: bool,
    /// Verification verdict ("verified", "partially_verified", "unverified",
    /// "contradicted"), set by the verify stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    /// Verification confidence in [0, 1], set by the verify stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Sources that support the claim, set by the verify stage.
    #[serde(default)]
    pub supporting_sources: Vec<SourceRef>,
    /// Sources that contradict the claim, set by the verify stage.
    #[serde(default)]
    pub contradicting_sources: Vec<SourceRef>,
}

impl Finding {
    /// Create an unverified finding.
    pub fn new(content: impl Into<String>, credibility: Credibility, agent: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            credibility,
            source_refs: Vec::new(),
            agent: agent.into(),
            verified: false,
            verdict: None,
            confidence: None,
            supporting_sources: Vec::new(),
            contradicting_sources: Vec::new(),
        }
    }
}

/// One section of a generated report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    /// Section heading.
    pub title: String,
    /// Section body (markdown).
    pub content: String,
    /// 1-based position in the report.
    pub order: usize,
}

/// The final research report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Report title.
    pub title: String,
    /// Executive summary.
    pub summary: String,
    /// Full markdown rendering.
    pub markdown_content: String,
    /// Ordered sections.
    pub sections: Vec<ReportSection>,
    /// Citation style used.
    pub citation_style: String,
    /// Quality score in [0, 5].
    pub quality_score: f64,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
}

/// A progress record fanned out to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Session this event belongs to.
    pub session_id: String,
    /// Stage (agent) name, or "orchestrator".
    pub agent: String,
    /// Agent status ("in_progress", "completed", "failed",
    /// "awaiting_approval", "cancelled", ...).
    pub status: String,
    /// Per-agent progress, 0-100.
    pub progress: u8,
    /// Weighted overall progress, 0-100.
    pub overall_progress: u8,
    /// Optional human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Optional error text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock emission time.
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Create an event for a stage.
    pub fn stage(session_id: &str, stage: Stage, status: &str, progress: u8) -> Self {
        Self {
            session_id: session_id.to_string(),
            agent: stage.as_str().to_string(),
            status: status.to_string(),
            progress,
            overall_progress: 0,
            message: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach an error.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Pipeline-artifact keys written by the stages.
pub mod artifact {
    /// Hierarchical findings with pattern cross-links (analyze).
    pub const ORGANIZED_FINDINGS: &str = "organized_findings";
    /// Consolidated findings (analyze).
    pub const CONSOLIDATED_FINDINGS: &str = "consolidated_findings";
    /// Patterns and themes (analyze).
    pub const PATTERNS: &str = "patterns";
    /// Key insights (analyze).
    pub const KEY_INSIGHTS: &str = "key_insights";
    /// Contradictions (analyze).
    pub const CONTRADICTIONS: &str = "contradictions";
    /// Findings annotated by verification (verify).
    pub const VALIDATED_FINDINGS: &str = "validated_findings";
    /// Weighted confidence summary (verify).
    pub const CONFIDENCE_SUMMARY: &str = "confidence_summary";
    /// Bias analysis over sampled sources (verify).
    pub const BIAS_ANALYSIS: &str = "bias_analysis";
    /// Statistical-claim verification results (verify).
    pub const STATISTICS_VERIFICATION: &str = "statistics_verification";
    /// Research plan (clarify).
    pub const RESEARCH_PLAN: &str = "research_plan";
    /// Search hint derived from the clarified query (clarify).
    pub const SEARCH_HINT: &str = "search_hint";
    /// Final report (report).
    pub const REPORT: &str = "report";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(SessionStatus::Rejected.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
        assert!(!SessionStatus::Initialized.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SessionStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let back: SessionStatus = serde_json::from_str("\"rejected\"").unwrap();
        assert_eq!(back, SessionStatus::Rejected);
    }

    #[test]
    fn test_credibility_parse() {
        assert_eq!(Credibility::parse("HIGH"), Credibility::High);
        assert_eq!(Credibility::parse(" low "), Credibility::Low);
        assert_eq!(Credibility::parse("whatever"), Credibility::Medium);
    }

    #[test]
    fn test_session_new() {
        let session = Session::new("s-1", "battery recycling", ResearchParams::default());
        assert_eq!(session.status, SessionStatus::Initialized);
        assert_eq!(session.query, "battery recycling");
        assert_eq!(session.overall_progress, 0);
        assert!(session.agents_executed.is_empty());
    }

    #[test]
    fn test_progress_event_roundtrip() {
        let event = ProgressEvent::stage("s-1", Stage::Retrieve, "in_progress", 40)
            .with_message("Searching: solar panels...");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["agent"], "retrieve");
        assert_eq!(json["progress"], 40);
        assert!(json.get("error").is_none());
        let back: ProgressEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.message.as_deref(), Some("Searching: solar panels..."));
    }
}

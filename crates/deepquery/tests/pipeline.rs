//! End-to-end pipeline tests: the orchestrator driven against mock
//! LLM/provider/store collaborators through every terminal outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deepquery::approval::{ApprovalResponse, ChannelCollaborator};
use deepquery::cache::ProviderCache;
use deepquery::cancel::CancelToken;
use deepquery::config::ResearchConfig;
use deepquery::fanout::SearchFanout;
use deepquery::llm::LanguageModel;
use deepquery::models::{
    artifact, ResearchMode, ResearchParams, SessionStatus, SourceType,
};
use deepquery::orchestrator::Orchestrator;
use deepquery::progress::ProgressBus;
use deepquery::providers::ProviderSet;
use deepquery::store::{MemoryStore, ResearchStore, SessionPatch};
use deepquery::testing::{MockLanguageModel, MockSearchProvider};
use deepquery::{Error, Result};
use serde_json::Value;

const QUERY: &str = "battery recycling in the EU";

/// LLM scripted for a full successful pipeline run.
fn scripted_llm() -> MockLanguageModel {
    MockLanguageModel::new()
        .with_rule(
            "Analyze this research query",
            "CLARITY: clear\nOBJECTIVE: assess battery recycling\nCLARIFIED_QUERY: battery recycling in the EU",
        )
        .with_rule("additional search queries", "EU battery directive\nlithium recovery rates")
        .with_rule("filtering search results", "0, 1, 2, 3, 4, 5, 6, 7, 8, 9")
        .with_rule(
            "extract the key findings",
            "FINDING: EU recycling capacity grew 40% between 2020 and 2024.\n\
             SOURCES: [1, 2]\n\
             CREDIBILITY: high\n\
             ---\n\
             FINDING: Collection rates still trail the 70% target.\n\
             SOURCES: [3]\n\
             CREDIBILITY: medium\n\
             ---",
        )
        .with_rule(
            "Consolidate these sources",
            r#"{"consolidated_findings": [
                {"title": "Capacity growth", "content": "Recycling capacity grew 40% since 2020.", "finding_type": "statistic", "source_refs": ["S1"], "confidence": "high"},
                {"title": "Collection gap", "content": "Collection rates trail the 70% target.", "finding_type": "fact", "source_refs": ["S2"], "confidence": "medium"},
                {"title": "Cost pressure", "content": "Recycled material costs 15% above virgin.", "finding_type": "statistic", "source_refs": ["S3"], "confidence": "medium"},
                {"title": "Policy driver", "content": "The 2023 regulation mandates recycled content.", "finding_type": "fact", "source_refs": ["S4"], "confidence": "high"}
            ]}"#,
        )
        .with_rule(
            "patterns and common themes",
            r#"{"patterns": [{"name": "Regulation-led growth", "description": "Policy drives capacity.", "strength": "strong", "supporting_findings": [0, 3]}]}"#,
        )
        .with_rule("contradictions or conflicting", r#"{"contradictions": []}"#)
        .with_rule(
            "important insights",
            "Regulation is the primary driver of recycling capacity growth in the EU.\nCollection infrastructure is the binding constraint through 2030.",
        )
        .with_rule(
            "support, contradict, or are neutral",
            r#"{"analysis": [{"source_index": 1, "verdict": "supports"}], "overall_verdict": "verified", "confidence": 0.9, "summary": "well supported"}"#,
        )
        .with_rule("STATISTICAL CLAIM", r#"{"verified": true, "confidence": 0.85, "found_values": ["40%"]}"#)
        .with_rule("potential bias", r#"{"bias_score": 0.2, "bias_types": []}"#)
        .with_rule("report title", "Battery Recycling in the European Union")
        .with_rule("logical report sections", r#"{"sections": ["Market Development", "Policy Landscape"]}"#)
        .with_rule("Write the", "The sector expanded materially, with capacity up 40% since 2020.")
        .with_rule("executive summary", "EU battery recycling is growing quickly, led by regulation.")
}

fn four_providers() -> (ProviderSet, Arc<MockSearchProvider>) {
    let news = Arc::new(MockSearchProvider::named("newsapi", SourceType::News).with_result_count(10));
    let providers = ProviderSet::new()
        .with(Arc::new(
            MockSearchProvider::named("serpapi", SourceType::Web).with_result_count(10),
        ))
        .with(Arc::clone(&news) as _)
        .with(Arc::new(
            MockSearchProvider::named("arxiv", SourceType::Academic).with_result_count(10),
        ))
        .with(Arc::new(
            MockSearchProvider::named("wikipedia", SourceType::Encyclopedia).with_result_count(10),
        ));
    (providers, news)
}

struct Harness {
    store: Arc<dyn ResearchStore>,
    bus: Arc<ProgressBus>,
    orchestrator: Orchestrator,
}

fn harness(llm: Arc<dyn LanguageModel>, providers: ProviderSet, config: ResearchConfig) -> Harness {
    let store: Arc<dyn ResearchStore> = Arc::new(MemoryStore::new());
    let bus = Arc::new(ProgressBus::new());
    let fanout = SearchFanout::new(providers, ProviderCache::disabled());
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        llm,
        fanout,
        Arc::clone(&bus),
        config,
    );
    Harness {
        store,
        bus,
        orchestrator,
    }
}

async fn seed_session(store: &Arc<dyn ResearchStore>, id: &str, params: ResearchParams) {
    let session = deepquery::models::Session::new(id, QUERY, params);
    store.session_insert(session).await.unwrap();
}

#[tokio::test]
async fn test_happy_path() {
    let (providers, _) = four_providers();
    let h = harness(Arc::new(scripted_llm()), providers, ResearchConfig::default());
    seed_session(&h.store, "s-happy", ResearchParams::default()).await;
    let mut sub = h.bus.subscribe("s-happy");

    let outcome = h
        .orchestrator
        .execute("s-happy", CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SessionStatus::Completed);

    let session = h.store.session_get("s-happy").await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.overall_progress, 100);
    assert_eq!(
        session.agents_executed,
        vec!["clarify", "retrieve", "analyze", "verify", "report"]
    );

    // Sources: capped, deduplicated, non-empty URLs.
    let sources = h.store.sources_list("s-happy").await.unwrap();
    assert!(!sources.is_empty());
    assert!(sources.len() <= session.params.max_sources);
    let mut urls: Vec<&str> = sources.iter().map(|s| s.url.as_str()).collect();
    assert!(urls.iter().all(|u| !u.is_empty()));
    urls.sort_unstable();
    let before = urls.len();
    urls.dedup();
    assert_eq!(before, urls.len(), "source URLs must be distinct");

    // Findings exist and every resolved reference points at a persisted
    // source URL.
    let findings = h.store.findings_list("s-happy").await.unwrap();
    assert!(!findings.is_empty());
    let url_set: std::collections::HashSet<&str> =
        sources.iter().map(|s| s.url.as_str()).collect();
    for finding in &findings {
        for reference in &finding.source_refs {
            assert!(url_set.contains(reference.url.as_str()));
        }
    }

    // The caller's query was never replaced.
    assert_eq!(session.query, QUERY);

    // Report persisted with a healthy quality score.
    let report = h.store.report_get("s-happy").await.unwrap().unwrap();
    assert!(report.quality_score > 2.0);
    assert!(report.markdown_content.contains("## References"));

    // Progress is monotonic non-decreasing across the emitted events and
    // ends at 100.
    let events = sub.drain();
    assert!(!events.is_empty());
    let mut last = 0;
    for event in &events {
        assert!(
            event.overall_progress >= last,
            "overall progress regressed: {} -> {}",
            last,
            event.overall_progress
        );
        last = event.overall_progress;
    }
    assert_eq!(last, 100);
}

#[tokio::test]
async fn test_provider_outage_is_isolated() {
    let news = Arc::new(MockSearchProvider::named("newsapi", SourceType::News).failing());
    let providers = ProviderSet::new()
        .with(Arc::new(
            MockSearchProvider::named("serpapi", SourceType::Web).with_result_count(10),
        ))
        .with(Arc::clone(&news) as _)
        .with(Arc::new(
            MockSearchProvider::named("wikipedia", SourceType::Encyclopedia).with_result_count(5),
        ));
    let h = harness(Arc::new(scripted_llm()), providers, ResearchConfig::default());
    seed_session(&h.store, "s-outage", ResearchParams::default()).await;

    let outcome = h
        .orchestrator
        .execute("s-outage", CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SessionStatus::Completed);

    let session = h.store.session_get("s-outage").await.unwrap();
    assert_eq!(session.sources_count["newsapi"], 0);
    assert!(session.sources_count["serpapi"] > 0);
    assert!(session.sources_count["wikipedia"] > 0);
    assert!(news.call_count() > 0, "the failing provider was actually queried");
}

#[tokio::test]
async fn test_zero_source_retry_happens_exactly_once() {
    // Every provider returns nothing, on the first pass and the retry. An
    // unscripted LLM mirrors reality: with no sources there is nothing to
    // consolidate, so every downstream stage runs on empty inputs.
    let providers = ProviderSet::new().with(Arc::new(
        MockSearchProvider::named("serpapi", SourceType::Web).with_result_count(0),
    ));
    let llm = Arc::new(MockLanguageModel::new());
    let h = harness(Arc::clone(&llm) as _, providers, ResearchConfig::default());
    seed_session(&h.store, "s-retry", ResearchParams::default()).await;

    let outcome = h
        .orchestrator
        .execute("s-retry", CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SessionStatus::Completed);

    let session = h.store.session_get("s-retry").await.unwrap();
    let retrieve_runs = session
        .agents_executed
        .iter()
        .filter(|agent| agent.as_str() == "retrieve")
        .count();
    assert_eq!(retrieve_runs, 2, "exactly one retry, never two");

    // The retry searched a broadened query.
    assert!(llm
        .prompts()
        .iter()
        .any(|prompt| prompt.contains("overview research analysis")));

    // Downstream stages ran on empty inputs; the report still completed
    // with a degraded quality score.
    let report = h.store.report_get("s-retry").await.unwrap().unwrap();
    assert!(report.quality_score < 2.0);
    assert_eq!(h.store.sources_count("s-retry").await.unwrap(), 0);
}

#[tokio::test]
async fn test_max_sources_zero_skips_retrieval_and_retry() {
    let (providers, news) = four_providers();
    let h = harness(
        Arc::new(MockLanguageModel::new()),
        providers,
        ResearchConfig::default(),
    );
    let params = ResearchParams {
        max_sources: 0,
        ..ResearchParams::default()
    };
    seed_session(&h.store, "s-zero", params).await;

    let outcome = h
        .orchestrator
        .execute("s-zero", CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SessionStatus::Completed);

    let session = h.store.session_get("s-zero").await.unwrap();
    assert_eq!(h.store.sources_count("s-zero").await.unwrap(), 0);
    assert_eq!(news.call_count(), 0, "no provider traffic with a zero cap");
    let retrieve_runs = session
        .agents_executed
        .iter()
        .filter(|agent| agent.as_str() == "retrieve")
        .count();
    assert_eq!(retrieve_runs, 1, "a deliberate zero cap is not retried");

    let report = h.store.report_get("s-zero").await.unwrap().unwrap();
    assert!(report.quality_score < 2.0);
}

#[tokio::test]
async fn test_cancellation_mid_retrieve() {
    // One slow provider keeps the fan-out in flight while we cancel.
    let providers = ProviderSet::new().with(Arc::new(
        MockSearchProvider::named("serpapi", SourceType::Web)
            .with_result_count(10)
            .with_delay(Duration::from_secs(10)),
    ));
    let h = harness(Arc::new(scripted_llm()), providers, ResearchConfig::default());
    seed_session(&h.store, "s-cancel", ResearchParams::default()).await;
    let mut sub = h.bus.subscribe("s-cancel");

    let cancel = CancelToken::new();
    let signal = cancel.clone();
    let orchestrator = h.orchestrator;
    let run = tokio::spawn(async move { orchestrator.execute("s-cancel", cancel).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    signal.cancel();
    signal.cancel(); // idempotent

    let outcome = run.await.unwrap().unwrap();
    assert_eq!(outcome.status, SessionStatus::Cancelled);

    let session = h.store.session_get("s-cancel").await.unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);

    // No downstream artifacts were persisted.
    for key in [
        artifact::ORGANIZED_FINDINGS,
        artifact::CONFIDENCE_SUMMARY,
        artifact::REPORT,
    ] {
        assert!(h
            .store
            .pipeline_data_get("s-cancel", key)
            .await
            .unwrap()
            .is_none());
    }
    assert!(h.store.report_get("s-cancel").await.unwrap().is_none());

    // At most one event after the cancel: the terminal one.
    let events = sub.drain();
    let cancelled_at = events
        .iter()
        .position(|event| event.status == "cancelled")
        .expect("terminal cancelled event");
    assert_eq!(cancelled_at, events.len() - 1);
    assert!(events
        .iter()
        .all(|event| !["analyze", "verify", "report"].contains(&event.agent.as_str())));
}

#[tokio::test]
async fn test_supervised_rejection_at_clarify() {
    let (providers, news) = four_providers();
    let (collaborator, mut receiver) = ChannelCollaborator::new();

    tokio::spawn(async move {
        while let Some(pending) = receiver.recv().await {
            pending.respond(ApprovalResponse::reject().with_feedback("not approved"));
        }
    });

    let h = harness(Arc::new(scripted_llm()), providers, ResearchConfig::default());
    let orchestrator = h.orchestrator.with_approvals(Arc::new(collaborator));
    let params = ResearchParams {
        mode: ResearchMode::Supervised,
        ..ResearchParams::default()
    };
    seed_session(&h.store, "s-reject", params).await;

    let outcome = orchestrator
        .execute("s-reject", CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SessionStatus::Rejected);

    let session = h.store.session_get("s-reject").await.unwrap();
    assert_eq!(session.status, SessionStatus::Rejected);
    assert_eq!(session.agents_executed, vec!["clarify"]);
    assert_eq!(news.call_count(), 0, "no retrieval work after rejection");
}

#[tokio::test]
async fn test_supervised_auto_continue_without_collaborator() {
    let (providers, _) = four_providers();
    let config = ResearchConfig::default()
        .with_checkpoint_autocontinue(Duration::from_millis(10));
    let h = harness(Arc::new(scripted_llm()), providers, config);
    let params = ResearchParams {
        mode: ResearchMode::Supervised,
        ..ResearchParams::default()
    };
    seed_session(&h.store, "s-auto", params).await;
    let mut sub = h.bus.subscribe("s-auto");

    let outcome = h
        .orchestrator
        .execute("s-auto", CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SessionStatus::Completed);

    // Checkpoints were announced before auto-continuing.
    let events = sub.drain();
    let awaiting: Vec<&str> = events
        .iter()
        .filter(|event| event.status == "awaiting_approval")
        .map(|event| event.agent.as_str())
        .collect();
    assert_eq!(awaiting, vec!["clarify", "retrieve", "analyze"]);
}

/// Store wrapper that fails exactly one `sources_list` call (the verify
/// stage's read, given the strict stage order), simulating a persistence
/// outage during verification.
struct FlakyReadStore {
    inner: MemoryStore,
    failing_call: usize,
    list_calls: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl ResearchStore for FlakyReadStore {
    async fn session_insert(&self, session: deepquery::models::Session) -> Result<()> {
        self.inner.session_insert(session).await
    }
    async fn session_get(&self, session_id: &str) -> Result<deepquery::models::Session> {
        self.inner.session_get(session_id).await
    }
    async fn session_update(&self, session_id: &str, patch: SessionPatch) -> Result<()> {
        self.inner.session_update(session_id, patch).await
    }
    async fn session_set_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        error: Option<String>,
    ) -> Result<()> {
        self.inner.session_set_status(session_id, status, error).await
    }
    async fn sources_append(
        &self,
        session_id: &str,
        sources: Vec<deepquery::models::Source>,
    ) -> Result<()> {
        self.inner.sources_append(session_id, sources).await
    }
    async fn sources_list(&self, session_id: &str) -> Result<Vec<deepquery::models::Source>> {
        let call = self
            .list_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        if call == self.failing_call {
            return Err(Error::store("simulated persistence outage"));
        }
        self.inner.sources_list(session_id).await
    }
    async fn sources_count(&self, session_id: &str) -> Result<usize> {
        self.inner.sources_count(session_id).await
    }
    async fn findings_append(
        &self,
        session_id: &str,
        findings: Vec<deepquery::models::Finding>,
    ) -> Result<()> {
        self.inner.findings_append(session_id, findings).await
    }
    async fn findings_list(&self, session_id: &str) -> Result<Vec<deepquery::models::Finding>> {
        self.inner.findings_list(session_id).await
    }
    async fn pipeline_data_put(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        self.inner.pipeline_data_put(session_id, key, value).await
    }
    async fn pipeline_data_get(&self, session_id: &str, key: &str) -> Result<Option<Value>> {
        self.inner.pipeline_data_get(session_id, key).await
    }
    async fn report_insert(&self, session_id: &str, report: deepquery::models::Report) -> Result<()> {
        self.inner.report_insert(session_id, report).await
    }
    async fn report_get(&self, session_id: &str) -> Result<Option<deepquery::models::Report>> {
        self.inner.report_get(session_id).await
    }
}

#[tokio::test]
async fn test_verify_failure_degrades_not_fails() {
    let (providers, _) = four_providers();
    // sources_list call order: analyze (1), verify (2), report (3).
    let store: Arc<dyn ResearchStore> = Arc::new(FlakyReadStore {
        inner: MemoryStore::new(),
        failing_call: 2,
        list_calls: std::sync::atomic::AtomicUsize::new(0),
    });
    let bus = Arc::new(ProgressBus::new());
    let fanout = SearchFanout::new(providers, ProviderCache::disabled());
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        Arc::new(scripted_llm()),
        fanout,
        Arc::clone(&bus),
        ResearchConfig::default(),
    );
    seed_session(&store, "s-verify", ResearchParams::default()).await;

    let outcome = orchestrator
        .execute("s-verify", CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SessionStatus::Completed, "verify failure must not fail the run");

    let session = store.session_get("s-verify").await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.errors.iter().any(|error| error.starts_with("verify:")));

    // The fallback confidence summary was persisted.
    let summary = store
        .pipeline_data_get("s-verify", artifact::CONFIDENCE_SUMMARY)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary["overall"], 0.5);
    assert_eq!(summary["confidence_level"], "medium");
    assert_eq!(summary["note"], "verification failed");

    // Report still ran.
    assert!(store.report_get("s-verify").await.unwrap().is_some());
}

#[tokio::test]
async fn test_stage_timeout_is_fatal() {
    // A clarify LLM that outlives the stage envelope.
    let providers = ProviderSet::new().with(Arc::new(
        MockSearchProvider::named("serpapi", SourceType::Web).with_result_count(3),
    ));
    struct SlowModel;
    #[async_trait]
    impl LanguageModel for SlowModel {
        async fn generate(&self, _request: deepquery::llm::GenerateRequest) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }
    let config = ResearchConfig::default().with_stage_timeout(Duration::from_millis(100));
    let h = harness(Arc::new(SlowModel), providers, config);
    seed_session(&h.store, "s-timeout", ResearchParams::default()).await;

    let outcome = h
        .orchestrator
        .execute("s-timeout", CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SessionStatus::Failed);
    let session = h.store.session_get("s-timeout").await.unwrap();
    assert!(session.error_message.as_deref().unwrap_or("").contains("timed out"));
}

#[tokio::test]
async fn test_search_hint_never_replaces_query() {
    // A clarify reply that rewrites the query; it must surface only as a
    // search hint.
    let llm = MockLanguageModel::new()
        .with_rule(
            "Analyze this research query",
            "CLARIFIED_QUERY: lithium-ion battery recycling economics in Europe",
        )
        .with_rule("additional search queries", "v1")
        .with_rule("filtering search results", "0, 1, 2, 3, 4")
        .with_rule(
            "extract the key findings",
            "FINDING: a claim\nSOURCES: [1]\nCREDIBILITY: medium\n---",
        )
        .with_rule("Consolidate these sources", r#"{"consolidated_findings": [{"title": "T", "content": "C", "confidence": "high"}]}"#)
        .with_rule("patterns and common themes", r#"{"patterns": []}"#)
        .with_rule("contradictions or conflicting", r#"{"contradictions": []}"#)
        .with_rule("important insights", "One durable insight about the market.")
        .with_rule("support, contradict, or are neutral", r#"{"overall_verdict": "verified", "confidence": 0.8}"#)
        .with_rule("potential bias", r#"{"bias_score": 0.3}"#)
        .with_rule("report title", "Title")
        .with_rule("logical report sections", r#"{"sections": ["Findings"]}"#)
        .with_rule("Write the", "Prose.")
        .with_rule("executive summary", "Summary.");

    let (providers, _) = four_providers();
    let h = harness(Arc::new(llm), providers, ResearchConfig::default());
    seed_session(&h.store, "s-hint", ResearchParams::default()).await;

    let outcome = h
        .orchestrator
        .execute("s-hint", CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SessionStatus::Completed);

    let session = h.store.session_get("s-hint").await.unwrap();
    assert_eq!(session.query, QUERY, "clarified variant is a hint, never a replacement");
    let hint = h
        .store
        .pipeline_data_get("s-hint", artifact::SEARCH_HINT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hint, "lithium-ion battery recycling economics in Europe");
}

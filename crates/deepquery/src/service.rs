// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Session lifecycle service.
//!
//! Owns the registry of in-flight runs: creates sessions, spawns the
//! orchestrator loop for each, and routes cancellation. A pipeline run
//! is pinned to the process that started it; there is no cross-process
//! hand-off.

use std::sync::Arc;

use dashmap::DashMap;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::models::{ResearchParams, Session};
use crate::orchestrator::{Orchestrator, RunOutcome};
use crate::store::ResearchStore;

struct ActiveRun {
    cancel: CancelToken,
    handle: tokio::task::JoinHandle<Result<RunOutcome>>,
}

/// Coordinates research sessions end to end.
pub struct ResearchService {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn ResearchStore>,
    active: DashMap<String, ActiveRun>,
}

impl ResearchService {
    /// Create the service.
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn ResearchStore>) -> Self {
        Self {
            orchestrator,
            store,
            active: DashMap::new(),
        }
    }

    /// Create a session and start its pipeline in the background.
    /// Returns the new session id.
    pub async fn start(&self, query: impl Into<String>, params: ResearchParams) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.start_with_id(&session_id, query, params).await?;
        Ok(session_id)
    }

    /// Start a pipeline for a caller-chosen session id.
    pub async fn start_with_id(
        &self,
        session_id: &str,
        query: impl Into<String>,
        params: ResearchParams,
    ) -> Result<()> {
        if self.is_active(session_id) {
            return Err(Error::Validation(format!(
                "session '{session_id}' is already running"
            )));
        }

        let session = Session::new(session_id, query, params);
        self.store.session_insert(session).await?;

        let cancel = CancelToken::new();
        let orchestrator = Arc::clone(&self.orchestrator);
        let run_cancel = cancel.clone();
        let run_session = session_id.to_string();
        let handle =
            tokio::spawn(async move { orchestrator.execute(&run_session, run_cancel).await });

        self.active
            .insert(session_id.to_string(), ActiveRun { cancel, handle });
        tracing::info!(session_id, "research session started");
        Ok(())
    }

    /// Signal cancellation for a running session. Idempotent; returns
    /// `false` when the session is not active in this process.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.active.get(session_id) {
            Some(run) => {
                tracing::info!(session_id, "cancelling research session");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a session's run is still in flight.
    pub fn is_active(&self, session_id: &str) -> bool {
        self.active
            .get(session_id)
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Ids of sessions started by this process and not yet waited on.
    pub fn active_sessions(&self) -> Vec<String> {
        self.active
            .iter()
            .filter(|entry| !entry.handle.is_finished())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Wait for a session's run to finish and take its outcome. `None`
    /// when the session was never started here (or already waited on).
    pub async fn wait(&self, session_id: &str) -> Option<Result<RunOutcome>> {
        let (_, run) = self.active.remove(session_id)?;
        match run.handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => Some(Err(Error::Validation(format!("run task panicked: {e}")))),
        }
    }
}

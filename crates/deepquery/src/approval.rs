// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Supervised-mode checkpoints.
//!
//! In supervised mode the orchestrator pauses after clarify, retrieve and
//! analyze, publishes an `awaiting_approval` event and asks the injected
//! [`ApprovalCollaborator`] for a decision. The channel-backed
//! collaborator here carries requests to an external handler (the
//! WebSocket facade, a CLI, a test) and responses back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::constants::DEFAULT_MPSC_CHANNEL_CAPACITY;
use crate::error::{Error, Result};

/// A checkpoint approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRequest {
    /// Session awaiting approval.
    pub session_id: String,
    /// Checkpoint name ("clarify_complete", "retrieve_complete",
    /// "analyze_complete").
    pub checkpoint: String,
    /// Context for the approval UI (plan, counts, analysis summary).
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Unique request id.
    pub request_id: String,
}

impl CheckpointRequest {
    /// Create a request with a fresh id.
    pub fn new(
        session_id: impl Into<String>,
        checkpoint: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            checkpoint: checkpoint.into(),
            payload,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// The human decision for a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponse {
    /// Whether to continue.
    pub approved: bool,
    /// Optional feedback text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Optional parameter modifications (e.g. revised focus areas).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifications: Option<serde_json::Value>,
}

impl ApprovalResponse {
    /// Approve without comment.
    pub fn approve() -> Self {
        Self {
            approved: true,
            feedback: None,
            modifications: None,
        }
    }

    /// Reject without comment.
    pub fn reject() -> Self {
        Self {
            approved: false,
            feedback: None,
            modifications: None,
        }
    }

    /// Attach feedback.
    #[must_use]
    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    /// Attach modifications.
    #[must_use]
    pub fn with_modifications(mut self, modifications: serde_json::Value) -> Self {
        self.modifications = Some(modifications);
        self
    }
}

/// Human-input collaborator consulted at supervised checkpoints.
#[async_trait]
pub trait ApprovalCollaborator: Send + Sync {
    /// Request a decision for a checkpoint. Implementations may block
    /// until a human responds; the orchestrator bounds the wait with its
    /// checkpoint timeout.
    async fn request_approval(&self, request: CheckpointRequest) -> Result<ApprovalResponse>;
}

/// A request waiting for its response.
pub struct PendingCheckpoint {
    /// The request.
    pub request: CheckpointRequest,
    response_tx: oneshot::Sender<ApprovalResponse>,
}

impl PendingCheckpoint {
    /// Deliver a response. Returns `false` if the orchestrator stopped
    /// waiting.
    pub fn respond(self, response: ApprovalResponse) -> bool {
        let request_id = self.request.request_id.clone();
        match self.response_tx.send(response) {
            Ok(()) => true,
            Err(_) => {
                tracing::error!(request_id, "approval response dropped: requester gone");
                false
            }
        }
    }
}

/// Channel-backed collaborator: requests flow out to a handler task,
/// responses flow back through a oneshot per request.
#[derive(Clone)]
pub struct ChannelCollaborator {
    request_tx: mpsc::Sender<PendingCheckpoint>,
}

/// Receiver half handed to the approval UI/handler.
pub struct CheckpointReceiver {
    request_rx: mpsc::Receiver<PendingCheckpoint>,
}

impl CheckpointReceiver {
    /// Next pending checkpoint; `None` once the collaborator is dropped.
    pub async fn recv(&mut self) -> Option<PendingCheckpoint> {
        self.request_rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<PendingCheckpoint> {
        self.request_rx.try_recv().ok()
    }
}

impl ChannelCollaborator {
    /// Create a collaborator and the receiver its handler consumes.
    pub fn new() -> (Self, CheckpointReceiver) {
        let (request_tx, request_rx) = mpsc::channel(DEFAULT_MPSC_CHANNEL_CAPACITY);
        (Self { request_tx }, CheckpointReceiver { request_rx })
    }
}

#[async_trait]
impl ApprovalCollaborator for ChannelCollaborator {
    async fn request_approval(&self, request: CheckpointRequest) -> Result<ApprovalResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        let pending = PendingCheckpoint {
            request,
            response_tx,
        };
        self.request_tx
            .send(pending)
            .await
            .map_err(|_| Error::Validation("approval channel closed".to_string()))?;
        response_rx
            .await
            .map_err(|_| Error::Validation("approval response channel dropped".to_string()))
    }
}

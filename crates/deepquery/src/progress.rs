// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Progress fan-out and weighted overall-progress computation.
//!
//! Each session has an in-process subscriber list; publishing delivers to
//! every local subscriber best-effort (a subscriber that cannot keep up
//! is skipped for that event, never buffered unboundedly) and, when a
//! cross-process channel is configured, onto `progress:{session_id}`
//! there. Remote unavailability degrades the bus to local-only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::agents::Stage;
use crate::constants::DEFAULT_PROGRESS_CHANNEL_CAPACITY;
use crate::error::Result;
use crate::models::ProgressEvent;

/// Cross-process publish/subscribe channel (Redis in production).
#[async_trait]
pub trait RemoteBus: Send + Sync {
    /// Publish a payload onto a channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to a channel, yielding raw payloads.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>>;
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ProgressEvent>,
}

/// A local subscription handle. Dropping it (or calling
/// [`ProgressBus::unsubscribe`]) detaches the subscriber.
pub struct ProgressSubscription {
    /// Session this subscription listens to.
    pub session_id: String,
    id: u64,
    rx: mpsc::Receiver<ProgressEvent>,
}

impl ProgressSubscription {
    /// Receive the next event; `None` once detached and drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Per-session fan-out of progress events.
#[derive(Default)]
pub struct ProgressBus {
    subscribers: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
    remote: Option<Arc<dyn RemoteBus>>,
}

impl ProgressBus {
    /// Local-only bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus that additionally publishes onto a cross-process channel.
    pub fn with_remote(remote: Arc<dyn RemoteBus>) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            remote: Some(remote),
        }
    }

    /// Channel name used for a session on the cross-process bus.
    pub fn channel_for(session_id: &str) -> String {
        format!("progress:{session_id}")
    }

    /// Register an in-process subscriber for a session.
    pub fn subscribe(&self, session_id: &str) -> ProgressSubscription {
        let (tx, rx) = mpsc::channel(DEFAULT_PROGRESS_CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(session_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        ProgressSubscription {
            session_id: session_id.to_string(),
            id,
            rx,
        }
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, subscription: &ProgressSubscription) {
        if let Some(mut entry) = self.subscribers.get_mut(&subscription.session_id) {
            entry.retain(|s| s.id != subscription.id);
        }
    }

    /// Number of live subscribers for a session.
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers.get(session_id).map_or(0, |s| s.len())
    }

    /// Deliver an event to every local subscriber and, when configured,
    /// the cross-process channel. Never blocks on a slow subscriber.
    pub async fn publish(&self, event: ProgressEvent) {
        let session_id = event.session_id.clone();

        if let Some(mut entry) = self.subscribers.get_mut(&session_id) {
            entry.retain(|subscriber| match subscriber.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow subscriber: skip this event, keep the subscriber.
                    tracing::debug!(session_id = %session_id, subscriber = subscriber.id, "slow subscriber skipped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }

        if let Some(remote) = self.remote.as_ref() {
            match serde_json::to_string(&event) {
                Ok(payload) => {
                    let channel = Self::channel_for(&session_id);
                    if let Err(e) = remote.publish(&channel, &payload).await {
                        tracing::warn!(session_id = %session_id, error = %e, "cross-process publish failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "progress event not serializable");
                }
            }
        }
    }
}

/// Tracks per-stage status and computes weighted overall progress.
///
/// Overall = sum of completed stage weights plus the running stage's
/// weight scaled by its progress, clamped to 100 and monotonic
/// non-decreasing within a run.
#[derive(Debug, Default, Clone)]
pub struct StageTracker {
    states: std::collections::HashMap<Stage, (String, u8)>,
    high_water: u8,
}

impl StageTracker {
    /// Fresh tracker with every stage idle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage's status and progress.
    pub fn update(&mut self, stage: Stage, status: &str, progress: u8) {
        self.states
            .insert(stage, (status.to_string(), progress.min(100)));
    }

    /// Weighted overall progress, 0-100, monotonic.
    pub fn overall(&mut self) -> u8 {
        let mut total: u32 = 0;
        for stage in Stage::ALL {
            let Some((status, progress)) = self.states.get(&stage) else {
                continue;
            };
            let weight = u32::from(stage.weight());
            match status.as_str() {
                "completed" => total += weight,
                "in_progress" | "awaiting_approval" => {
                    total += weight * u32::from(*progress) / 100;
                }
                _ => {}
            }
        }
        let overall = total.min(100) as u8;
        self.high_water = self.high_water.max(overall);
        self.high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProgressEvent;

    fn event(session_id: &str, progress: u8) -> ProgressEvent {
        ProgressEvent::stage(session_id, Stage::Retrieve, "in_progress", progress)
    }

    #[tokio::test]
    async fn test_subscribe_publish_order() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe("s-1");

        bus.publish(event("s-1", 10)).await;
        bus.publish(event("s-1", 20)).await;

        assert_eq!(sub.recv().await.unwrap().progress, 10);
        assert_eq!(sub.recv().await.unwrap().progress, 20);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe("s-1");

        bus.publish(event("s-2", 50)).await;
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = ProgressBus::new();
        let sub = bus.subscribe("s-1");
        assert_eq!(bus.subscriber_count("s-1"), 1);
        bus.unsubscribe(&sub);
        assert_eq!(bus.subscriber_count("s-1"), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_skipped_not_dropped() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe("s-1");

        // Overfill the channel; excess events are dropped for this
        // subscriber without blocking the publisher.
        for i in 0..(DEFAULT_PROGRESS_CHANNEL_CAPACITY + 50) {
            bus.publish(event("s-1", (i % 100) as u8)).await;
        }
        assert_eq!(bus.subscriber_count("s-1"), 1);
        let drained = sub.drain();
        assert_eq!(drained.len(), DEFAULT_PROGRESS_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_pruned_on_publish() {
        let bus = ProgressBus::new();
        let sub = bus.subscribe("s-1");
        drop(sub);
        bus.publish(event("s-1", 5)).await;
        assert_eq!(bus.subscriber_count("s-1"), 0);
    }

    #[tokio::test]
    async fn test_remote_publish() {
        use parking_lot::Mutex;

        #[derive(Default)]
        struct RecordingBus {
            published: Mutex<Vec<(String, String)>>,
        }

        #[async_trait]
        impl RemoteBus for RecordingBus {
            async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
                self.published
                    .lock()
                    .push((channel.to_string(), payload.to_string()));
                Ok(())
            }
            async fn subscribe(&self, _channel: &str) -> Result<BoxStream<'static, String>> {
                Ok(Box::pin(futures::stream::empty()))
            }
        }

        let remote = Arc::new(RecordingBus::default());
        let bus = ProgressBus::with_remote(Arc::clone(&remote) as Arc<dyn RemoteBus>);
        bus.publish(event("s-1", 33)).await;

        let published = remote.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "progress:s-1");
        assert!(published[0].1.contains("\"progress\":33"));
    }

    #[test]
    fn test_weighted_overall() {
        let mut tracker = StageTracker::new();
        tracker.update(Stage::Clarify, "completed", 100);
        tracker.update(Stage::Retrieve, "in_progress", 50);
        // 10 + 30*0.5 = 25
        assert_eq!(tracker.overall(), 25);

        tracker.update(Stage::Retrieve, "completed", 100);
        tracker.update(Stage::Analyze, "in_progress", 20);
        // 10 + 30 + 25*0.2 = 45
        assert_eq!(tracker.overall(), 45);
    }

    #[test]
    fn test_overall_is_monotonic() {
        let mut tracker = StageTracker::new();
        tracker.update(Stage::Retrieve, "in_progress", 90);
        let high = tracker.overall();
        // A stage failure resets its own progress, but overall never
        // moves backwards.
        tracker.update(Stage::Retrieve, "failed", 0);
        assert_eq!(tracker.overall(), high);
    }

    #[test]
    fn test_overall_completes_at_100() {
        let mut tracker = StageTracker::new();
        for stage in Stage::ALL {
            tracker.update(stage, "completed", 100);
        }
        assert_eq!(tracker.overall(), 100);
    }
}

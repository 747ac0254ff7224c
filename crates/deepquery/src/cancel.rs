// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Cooperative cancellation.
//!
//! A [`CancelToken`] is created by the orchestrator and cloned into the
//! retrieval fan-out, every provider call and every LLM call. Pending
//! work observes cancellation at its next suspension point; cancelling is
//! idempotent.

use tokio::sync::watch;

/// A cloneable cancellation token backed by a watch channel.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Signal cancellation. Safe to call more than once; only the first
    /// call changes state.
    pub fn cancel(&self) {
        // send_replace never fails: this struct holds a receiver.
        self.tx.send_replace(true);
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled. Returns immediately if the
    /// token is already cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // The sender lives inside self, so changed() only errs if every
        // clone was dropped - in which case cancellation can never fire.
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // All senders gone without a cancel: park forever.
        std::future::pending::<()>().await;
    }

    /// Run a future, aborting with `Error::Cancelled` if the token fires
    /// first.
    pub async fn guard<T>(
        &self,
        fut: impl std::future::Future<Output = crate::error::Result<T>>,
    ) -> crate::error::Result<T> {
        tokio::select! {
            biased;
            () = self.cancelled() => Err(crate::error::Error::Cancelled),
            result = fut => result,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_starts_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
        // Already-cancelled tokens resolve immediately.
        clone.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_guard_aborts() {
        let token = CancelToken::new();
        token.cancel();
        let result = token
            .guard(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(crate::error::Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_guard_passes_through() {
        let token = CancelToken::new();
        let result = token.guard(async { Ok(42) }).await.unwrap();
        assert_eq!(result, 42);
    }
}

// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Centralized constants shared across the pipeline.
//!
//! Integration crates reuse the HTTP timeouts so every outbound client
//! behaves the same way; the orchestration constants mirror the stage
//! weights and envelopes documented in the crate-level docs.

use std::time::Duration;

/// Connect timeout applied to every outbound HTTP client.
pub const DEFAULT_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request timeout applied to every outbound HTTP client.
pub const DEFAULT_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-provider envelope inside the search fan-out.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-stage envelope applied by the orchestrator.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(120);

/// How long a supervised checkpoint waits before auto-continuing when no
/// approval collaborator is attached.
pub const DEFAULT_CHECKPOINT_AUTOCONTINUE: Duration = Duration::from_millis(500);

/// How long a supervised checkpoint waits for an attached collaborator.
pub const DEFAULT_CHECKPOINT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default TTL for cached provider responses (24 hours).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(86_400);

/// Capacity of per-subscriber progress channels. A subscriber that falls
/// this far behind starts losing events rather than blocking the publisher.
pub const DEFAULT_PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Capacity for approval request channels.
pub const DEFAULT_MPSC_CHANNEL_CAPACITY: usize = 32;

/// Default cap on persisted sources per session.
pub const DEFAULT_MAX_SOURCES: usize = 300;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_ordering() {
        // The stage envelope must dominate a single provider call.
        assert!(DEFAULT_STAGE_TIMEOUT > DEFAULT_PROVIDER_TIMEOUT);
        assert!(DEFAULT_HTTP_REQUEST_TIMEOUT >= DEFAULT_HTTP_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_cache_ttl_is_24h() {
        assert_eq!(DEFAULT_CACHE_TTL.as_secs(), 24 * 60 * 60);
    }
}

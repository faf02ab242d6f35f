use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionPhase;

/// Broad error category driving absorb/surface/retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncErrorCategory {
    /// Invalid or incomplete query; absorbed as an empty result set.
    Query,
    /// A single foreign-key lookup failed; degrades that one record.
    Resolution,
    /// A remote write failed after an optimistic local update; logged.
    Mutation,
    /// The store cannot be reached; surfaced as a sticky error and retried.
    Transport,
    /// Internal engine bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the command/state boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct SyncError {
    /// High-level category.
    pub category: SyncErrorCategory,
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl SyncError {
    /// Construct a new error.
    pub fn new(
        category: SyncErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Retry hint as a duration, when present.
    pub fn retry_hint(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }

    /// A required filter value is absent or empty.
    pub fn invalid_query(detail: impl Into<String>) -> Self {
        Self::new(SyncErrorCategory::Query, "invalid_query", detail)
    }

    /// A command was issued in a phase that does not accept it.
    pub fn invalid_transition(current: SessionPhase, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            SyncErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while session is in phase {current:?}"),
        )
    }

    /// Subscribing or fetching could not reach the store.
    pub fn store_unreachable(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCategory::Transport, "store_unreachable", message)
    }

    /// The store ended a snapshot stream without an unsubscribe from us.
    pub fn subscription_closed(collection: &str) -> Self {
        Self::new(
            SyncErrorCategory::Transport,
            "subscription_closed",
            format!("snapshot stream for '{collection}' ended unexpectedly"),
        )
    }

    /// A point lookup behind a foreign-key join failed.
    pub fn resolution_failed(message: impl Into<String>) -> Self {
        Self::new(
            SyncErrorCategory::Resolution,
            "profile_lookup_failed",
            message,
        )
    }

    /// A mutation targeted a document that does not exist.
    pub fn document_not_found(collection: &str, id: &str) -> Self {
        Self::new(
            SyncErrorCategory::Mutation,
            "document_not_found",
            format!("document '{id}' not found in '{collection}'"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_invalid_transition_code_stable() {
        let err = SyncError::invalid_transition(SessionPhase::Idle, "load_more");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.category, SyncErrorCategory::Internal);
        assert!(err.message.contains("load_more"));
    }

    #[test]
    fn persists_retry_hint_in_millis() {
        let err = SyncError::store_unreachable("connection refused")
            .with_retry_after(Duration::from_secs(3));
        assert_eq!(err.retry_after_ms, Some(3000));
        assert_eq!(err.retry_hint(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn categorizes_constructors() {
        assert_eq!(
            SyncError::invalid_query("empty filter").category,
            SyncErrorCategory::Query
        );
        assert_eq!(
            SyncError::resolution_failed("lookup failed").category,
            SyncErrorCategory::Resolution
        );
        assert_eq!(
            SyncError::document_not_found("notifications", "n-1").category,
            SyncErrorCategory::Mutation
        );
        assert_eq!(
            SyncError::subscription_closed("messages").category,
            SyncErrorCategory::Transport
        );
    }
}

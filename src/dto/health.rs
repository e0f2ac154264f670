use serde::Serialize;

use crate::services::reconciler::FeedStatus;

/// Health response returned by the `/health` route.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Slug of the followed event, if one is loaded.
    pub event: Option<String>,
    /// State of the realtime subscriptions.
    pub feed: FeedStatus,
}

impl HealthResponse {
    /// Create a health response indicating the event is loaded and live.
    pub fn ok(event: Option<String>, feed: FeedStatus) -> Self {
        Self {
            status: "ok".to_string(),
            event,
            feed,
        }
    }

    /// Create a health response indicating the service runs on a stale or missing snapshot.
    pub fn degraded(event: Option<String>, feed: FeedStatus) -> Self {
        Self {
            status: "degraded".to_string(),
            event,
            feed,
        }
    }
}

//! Payloads of the change-notification webhook.

use serde::Serialize;

/// Acknowledgement of an ingested notification.
#[derive(Debug, Serialize)]
pub struct FeedAck {
    /// Table the notification was published on.
    pub table: String,
    /// Number of live subscriptions that received it.
    pub delivered: usize,
}

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{error::ServiceError, services::reconciler::FeedStatus, state::SharedState};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Follow `slug`, reloading it and remounting the subscriptions whenever the realtime feed
/// degrades. Transient load failures are retried with exponential backoff; a missing or
/// malformed event ends the loop.
pub async fn run(state: SharedState, slug: String) {
    let mut delay = INITIAL_DELAY;

    loop {
        match state.follow(&slug).await {
            Ok(_) => {
                delay = INITIAL_DELAY;
                let mut feed = state.feed_watcher();
                loop {
                    if matches!(*feed.borrow_and_update(), FeedStatus::Degraded(_)) {
                        break;
                    }
                    if feed.changed().await.is_err() {
                        return;
                    }
                }
                warn!(slug, "realtime sync degraded; reloading event");
            }
            Err(err) if is_transient(&err) => {
                warn!(slug, error = %err, "event load attempt failed");
            }
            Err(err) => {
                warn!(slug, error = %err, "event cannot be followed; giving up");
                return;
            }
        }

        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
        info!(slug, "retrying event synchronization");
    }
}

fn is_transient(err: &ServiceError) -> bool {
    match err {
        ServiceError::Network(_) => true,
        ServiceError::ServerRejected { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether the followed event is loaded and live.
pub async fn healthcheck(State(state): State<SharedState>) -> Json<HealthResponse> {
    let event = state
        .store()
        .get()
        .map(|aggregate| aggregate.metadata.slug.clone());
    let feed = state.feed_status();
    if state.is_degraded() {
        Json(HealthResponse::degraded(event, feed))
    } else {
        Json(HealthResponse::ok(event, feed))
    }
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/health", get(healthcheck))
}

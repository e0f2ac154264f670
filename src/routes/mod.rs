use axum::Router;

use crate::state::SharedState;

/// Participant and playlist administration.
pub mod admin;
/// Change-feed webhook.
pub mod feed;
/// Health probe.
pub mod health;
/// Playback selection and flush.
pub mod playback;
/// Current view and its SSE stream.
pub mod view;

/// Compose all route trees, wiring in shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(view::router())
        .merge(playback::router())
        .merge(admin::router())
        .merge(feed::router())
        .with_state(state)
}

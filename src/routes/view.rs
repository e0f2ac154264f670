use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    dto::view::SyncSnapshot,
    services::view_stream,
    state::SharedState,
};

/// Current view of the followed event with its loading and action state.
pub async fn current_view(State(state): State<SharedState>) -> Json<SyncSnapshot> {
    Json(state.snapshot())
}

/// Stream a snapshot on every change of the followed event.
pub async fn stream_view(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New view SSE connection");
    view_stream::to_sse_stream(state)
}

/// Configure the view endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/view", get(current_view))
        .route("/sse/view", get(stream_view))
}

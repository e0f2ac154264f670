use axum::{Json, Router, extract::State, routing::post};
use axum_valid::Valid;

use crate::{
    dto::{
        playback::{FlushResponse, SelectSlideRequest, SelectSongRequest},
        view::SyncSnapshot,
    },
    error::{AppError, ServiceError},
    state::SharedState,
};

/// Playback endpoints feeding the autosave controller.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/playback/song", post(select_song))
        .route("/playback/slide", post(select_slide))
        .route("/playback/flush", post(flush))
}

fn require_event(state: &SharedState) -> Result<(), AppError> {
    match state.store().event_id() {
        Some(_) => Ok(()),
        None => Err(ServiceError::Degraded.into()),
    }
}

/// Select the active song. Responds immediately with the optimistic snapshot.
pub async fn select_song(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<SelectSongRequest>>,
) -> Result<Json<SyncSnapshot>, AppError> {
    require_event(&state)?;
    state.autosave().set_song(payload.song_id);
    Ok(Json(state.snapshot()))
}

/// Select the active slide. Responds immediately with the optimistic snapshot.
pub async fn select_slide(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<SelectSlideRequest>>,
) -> Result<Json<SyncSnapshot>, AppError> {
    require_event(&state)?;
    state.autosave().set_slide(payload.position);
    Ok(Json(state.snapshot()))
}

/// Send pending playback saves now, e.g. before a client goes away.
pub async fn flush(State(state): State<SharedState>) -> Json<FlushResponse> {
    let sent = state.autosave().flush().await;
    Json(FlushResponse { sent })
}

use axum::{Json, Router, extract::State, routing::post};
use axum_valid::Valid;

use crate::{
    dto::{
        admin::{ChangePlaylistRequest, InviteParticipantRequest, KickParticipantRequest},
        view::SyncSnapshot,
    },
    error::AppError,
    state::SharedState,
};

/// Participant and playlist management on behalf of the configured viewer.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/admin/invite", post(invite))
        .route("/admin/kick", post(kick))
        .route("/admin/playlist", post(change_playlist))
}

/// Invite a user or change the role of an existing participant.
pub async fn invite(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<InviteParticipantRequest>>,
) -> Result<Json<SyncSnapshot>, AppError> {
    state.events().invite(payload.user_id, payload.role).await?;
    Ok(Json(state.snapshot()))
}

/// Kick a participant.
pub async fn kick(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<KickParticipantRequest>>,
) -> Result<Json<SyncSnapshot>, AppError> {
    state.events().kick(payload.user_id).await?;
    Ok(Json(state.snapshot()))
}

/// Switch the active playlist.
pub async fn change_playlist(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ChangePlaylistRequest>>,
) -> Result<Json<SyncSnapshot>, AppError> {
    state.events().change_playlist(payload.playlist_id).await?;
    Ok(Json(state.snapshot()))
}

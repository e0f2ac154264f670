//! DTO definitions used by the admin endpoints.

use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::validation::{validate_identifier, validate_invite_role},
    state::aggregate::ParticipantRole,
};

/// Invite a user, or change the role of an existing participant.
#[derive(Debug, Deserialize, Validate)]
pub struct InviteParticipantRequest {
    /// Target user.
    pub user_id: Uuid,
    /// Role granted on acceptance.
    #[serde(default = "default_role")]
    #[validate(custom(function = validate_invite_role))]
    pub role: ParticipantRole,
}

fn default_role() -> ParticipantRole {
    ParticipantRole::Participant
}

/// Kick a participant out of the event.
#[derive(Debug, Deserialize, Validate)]
pub struct KickParticipantRequest {
    /// Target user.
    pub user_id: Uuid,
}

/// Switch the active playlist; `null` detaches it.
#[derive(Debug, Deserialize, Validate)]
pub struct ChangePlaylistRequest {
    /// Playlist to activate, or `None` to clear it.
    #[validate(custom(function = validate_identifier))]
    pub playlist_id: Option<String>,
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::state::{
    aggregate::{EventMetadata, MetadataPatch, Participant, ParticipantRole},
    participant::ParticipantStatus,
};

/// Untyped database row as delivered by queries and change notifications.
pub type Row = Map<String, Value>;

/// Full shape of a row of the `events` table.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EventRow {
    /// Primary key.
    pub id: Uuid,
    /// User who created the event.
    #[serde(alias = "created_by")]
    pub owner_id: Uuid,
    /// Display name.
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    /// URL-safe unique identifier.
    #[validate(custom(function = validate_slug))]
    pub slug: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether the event is listed publicly.
    #[serde(default)]
    pub is_public: bool,
    /// Performer notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Creation timestamp, as sent by the backend.
    #[serde(default)]
    pub created_at: Option<String>,
    /// Last update timestamp, as sent by the backend.
    #[serde(default)]
    pub updated_at: Option<String>,
    /// Playlist currently in use.
    #[serde(default)]
    pub active_playlist_id: Option<String>,
    /// Song currently shown.
    #[serde(default)]
    pub active_song_id: Option<String>,
    /// Slide currently shown within the active song.
    #[serde(default)]
    pub active_slide_position: Option<u32>,
}

impl EventRow {
    /// Decode and validate a raw row.
    pub fn from_row(row: &Row) -> Result<Self, String> {
        let parsed: EventRow =
            serde_json::from_value(Value::Object(row.clone())).map_err(|err| err.to_string())?;
        parsed.validate().map_err(|err| err.to_string())?;
        Ok(parsed)
    }

    /// Metadata carried by the row.
    pub fn metadata(&self) -> EventMetadata {
        EventMetadata {
            name: self.name.clone(),
            slug: self.slug.clone(),
            description: self.description.clone(),
            is_public: self.is_public,
            notes: self.notes.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
            active_playlist_id: self.active_playlist_id.clone(),
            active_song_id: self.active_song_id.clone(),
            active_slide_position: self.active_slide_position,
        }
    }
}

/// Row of the `event_participants` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRow {
    /// Event the row belongs to.
    pub event_id: Uuid,
    /// Participant user.
    pub user_id: Uuid,
    /// Role within the event.
    pub role: ParticipantRole,
    /// Membership status.
    pub status: ParticipantStatus,
    /// When the user joined, as sent by the backend.
    #[serde(default)]
    pub joined_at: Option<String>,
}

impl From<ParticipantRow> for Participant {
    fn from(row: ParticipantRow) -> Self {
        Self {
            user_id: row.user_id,
            role: row.role,
            status: row.status,
            joined_at: row.joined_at,
            username: None,
        }
    }
}

/// Row of the `profiles` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRow {
    /// Primary key.
    pub id: Uuid,
    /// Display name, if set.
    #[serde(default)]
    pub username: Option<String>,
}

/// A song attached to a playlist, in playlist order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongRow {
    /// Primary key.
    #[serde(alias = "song_id")]
    pub id: String,
    /// Song title.
    #[serde(default)]
    pub title: Option<String>,
    /// Order within the playlist.
    pub position: i32,
}

/// A slide of a song, identified by its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideRow {
    /// Song the slide belongs to.
    pub song_id: String,
    /// Zero-based position within the song.
    pub position: u32,
    /// Optional slide label.
    #[serde(default)]
    pub label: Option<String>,
}

/// Body of a save request: the event key plus the changed metadata fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventPatch {
    /// Event to update.
    pub event_id: Uuid,
    /// Changed metadata fields.
    #[serde(flatten)]
    pub fields: MetadataPatch,
}

/// Body of an invite request.
#[derive(Debug, Clone, Serialize)]
pub struct InviteRequest {
    /// Event the user is invited to.
    pub event_id: Uuid,
    /// Invited user.
    pub user_id: Uuid,
    /// Role to grant.
    pub role: ParticipantRole,
    /// Status to store, usually `invited`.
    pub status: ParticipantStatus,
}

/// Body of a kick request.
#[derive(Debug, Clone, Serialize)]
pub struct KickRequest {
    /// Event to remove the user from.
    pub event_id: Uuid,
    /// Removed user.
    pub user_id: Uuid,
    /// Status to store, always `kicked`.
    pub status: ParticipantStatus,
}

/// Validates that a slug only holds lowercase ASCII letters, digits and single dashes.
pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    if slug.is_empty() || slug.len() > 120 {
        let mut err = ValidationError::new("slug_length");
        err.message = Some(format!("slug must be 1 to 120 characters (got {})", slug.len()).into());
        return Err(err);
    }

    let well_formed = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--");
    if !well_formed {
        let mut err = ValidationError::new("slug_format");
        err.message = Some("slug must be lowercase words separated by single dashes".into());
        return Err(err);
    }

    Ok(())
}

//! Read-only projection of the aggregate for a given viewer.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::{
    dao::models::{SlideRow, SongRow},
    state::{
        aggregate::{EventAggregate, ParticipantRole},
        participant::{ParticipantStatus, Permissions, derive_status, permissions_for},
        playback::PlaybackSelection,
    },
};

/// Display name used when a user's profile has not been resolved.
pub const UNKNOWN_NAME: &str = "unknown";

/// Songs of one playlist and the slide positions of each song.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SongCatalog {
    /// Playlist the songs belong to.
    pub playlist_id: String,
    /// Songs in playlist order.
    pub songs: Vec<SongRow>,
    /// Ordered, de-duplicated slide positions keyed by song id.
    pub slides: HashMap<String, Vec<u32>>,
}

impl SongCatalog {
    /// Build a catalog from unordered rows.
    pub fn new(playlist_id: String, mut songs: Vec<SongRow>, slide_rows: Vec<SlideRow>) -> Self {
        songs.sort_by_key(|song| song.position);

        let mut slides: HashMap<String, Vec<u32>> = HashMap::new();
        for row in slide_rows {
            slides.entry(row.song_id).or_default().push(row.position);
        }
        for positions in slides.values_mut() {
            positions.sort_unstable();
            positions.dedup();
        }

        Self {
            playlist_id,
            songs,
            slides,
        }
    }

    fn slides_of(&self, song_id: &str) -> &[u32] {
        self.slides.get(song_id).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Roster entry with its resolved display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantView {
    /// Participant user.
    pub user_id: Uuid,
    /// Display name.
    pub name: String,
    /// Role within the event.
    pub role: ParticipantRole,
    /// Membership status.
    pub status: ParticipantStatus,
    /// When the user joined, as sent by the backend.
    pub joined_at: Option<String>,
}

/// Everything a client needs to render the event for one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventView {
    /// Event id.
    pub event_id: Uuid,
    /// Display name.
    pub name: String,
    /// URL-safe unique identifier.
    pub slug: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Whether the event is listed publicly.
    pub is_public: bool,
    /// Performer notes.
    pub notes: Option<String>,
    /// User who created the event.
    pub owner_id: Uuid,
    /// Owner display name.
    pub owner_name: String,
    /// Roster in display order.
    pub participants: Vec<ParticipantView>,
    /// User the view is computed for.
    pub viewer_id: Option<Uuid>,
    /// Membership status of the viewer.
    pub viewer_status: ParticipantStatus,
    /// What the viewer may see and do.
    pub permissions: Permissions,
    /// Whether the viewer may edit the event and its roster.
    pub can_manage_event: bool,
    /// Whether the viewer may change the playlist and playback.
    pub can_manage_playlist: bool,
    /// Playlist currently in use.
    pub active_playlist_id: Option<String>,
    /// Song currently shown.
    pub active_song_id: Option<String>,
    /// Slide currently shown within the active song.
    pub active_slide_position: Option<u32>,
    /// Songs of the active playlist, in order.
    pub songs: Vec<SongRow>,
    /// Slide positions of the active song, in order.
    pub slides: Vec<u32>,
    /// Number of slides of the active song.
    pub active_song_total_slides: usize,
    /// The active playlist has no songs.
    pub has_no_songs: bool,
    /// The active song has no slides.
    pub has_no_slides: bool,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

fn display_name(username: Option<&str>) -> String {
    present(username).unwrap_or(UNKNOWN_NAME).to_string()
}

/// Project `aggregate` for `viewer`.
///
/// The catalog only contributes when it belongs to the active playlist. `overlay` holds
/// the locally selected song and slide, which win over the aggregate's values.
pub fn compute(
    aggregate: &EventAggregate,
    viewer: Option<Uuid>,
    catalog: Option<&SongCatalog>,
    overlay: Option<&PlaybackSelection>,
) -> EventView {
    let metadata = &aggregate.metadata;
    let viewer_status = derive_status(aggregate, viewer);

    let viewer_role = match viewer {
        Some(id) if id == aggregate.owner_id => Some(ParticipantRole::Owner),
        Some(id) => aggregate.role_of(id),
        None => None,
    };
    let active = viewer_status != ParticipantStatus::Kicked;
    let can_manage_event = active && viewer_role.is_some_and(ParticipantRole::can_manage_event);
    let can_manage_playlist =
        active && viewer_role.is_some_and(ParticipantRole::can_manage_playlist);

    let active_playlist_id = present(metadata.active_playlist_id.as_deref()).map(str::to_string);
    let (active_song_id, active_slide_position) = match overlay {
        Some(selection) => (
            selection.effective_song(metadata),
            selection.effective_slide(metadata),
        ),
        None => (
            metadata.active_song_id.as_deref(),
            metadata.active_slide_position,
        ),
    };
    let active_song_id = present(active_song_id).map(str::to_string);

    let catalog = catalog.filter(|catalog| {
        active_playlist_id.as_deref() == Some(catalog.playlist_id.as_str())
    });
    let songs = catalog
        .map(|catalog| catalog.songs.clone())
        .unwrap_or_default();
    let slides = match (catalog, active_song_id.as_deref()) {
        (Some(catalog), Some(song_id)) => catalog.slides_of(song_id).to_vec(),
        _ => Vec::new(),
    };

    let owner_name = display_name(aggregate.owner_username.as_deref().or_else(|| {
        aggregate
            .participants
            .get(&aggregate.owner_id)
            .and_then(|entry| entry.username.as_deref())
    }));
    let participants = aggregate
        .participants
        .values()
        .map(|entry| ParticipantView {
            user_id: entry.user_id,
            name: display_name(entry.username.as_deref()),
            role: entry.role,
            status: entry.status,
            joined_at: entry.joined_at.clone(),
        })
        .collect();

    EventView {
        event_id: aggregate.event_id,
        name: metadata.name.clone(),
        slug: metadata.slug.clone(),
        description: present(metadata.description.as_deref()).map(str::to_string),
        is_public: metadata.is_public,
        notes: present(metadata.notes.as_deref()).map(str::to_string),
        owner_id: aggregate.owner_id,
        owner_name,
        participants,
        viewer_id: viewer,
        viewer_status,
        permissions: permissions_for(viewer_status),
        can_manage_event,
        can_manage_playlist,
        active_playlist_id,
        active_song_id,
        active_slide_position,
        active_song_total_slides: slides.len(),
        has_no_songs: songs.is_empty(),
        has_no_slides: slides.is_empty(),
        songs,
        slides,
    }
}

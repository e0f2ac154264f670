use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::participant::ParticipantStatus;

/// Role a user holds inside an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// Creator of the event.
    Owner,
    /// Co-host allowed to manage the event and its roster.
    Admin,
    /// Member allowed to drive the playlist but not the roster.
    #[serde(alias = "playlist-admin")]
    PlaylistAdmin,
    /// Regular member.
    Participant,
    /// Legacy marker some rows carry instead of a kicked status.
    Kicked,
}

impl ParticipantRole {
    /// Whether this role may invite, kick and edit event details.
    pub fn can_manage_event(self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }

    /// Whether this role may change the active playlist and playback.
    pub fn can_manage_playlist(self) -> bool {
        matches!(self, Self::Owner | Self::Admin | Self::PlaylistAdmin)
    }
}

/// Mutable descriptive and playback fields of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventMetadata {
    /// Display name.
    pub name: String,
    /// URL slug the event is looked up by.
    pub slug: String,
    /// Optional long description.
    pub description: Option<String>,
    /// Whether the event is listed publicly.
    pub is_public: bool,
    /// Free-form notes for the hosts.
    pub notes: Option<String>,
    /// Creation timestamp as reported by the backend.
    pub created_at: Option<String>,
    /// Last update timestamp as reported by the backend.
    pub updated_at: Option<String>,
    /// Playlist currently being presented.
    pub active_playlist_id: Option<String>,
    /// Song currently being presented.
    pub active_song_id: Option<String>,
    /// Slide position within the active song.
    pub active_slide_position: Option<u32>,
}

/// Field-level patch for [`EventMetadata`].
///
/// An absent field leaves the current value untouched. For nullable fields the inner
/// `None` clears the value, which serializes as an explicit JSON `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPatch {
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New slug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    /// Description; inner `None` clears it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub description: Option<Option<String>>,
    /// New visibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    /// Notes; inner `None` clears them.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub notes: Option<Option<String>>,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Last update timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Active playlist; inner `None` clears it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub active_playlist_id: Option<Option<String>>,
    /// Active song; inner `None` clears it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub active_song_id: Option<Option<String>>,
    /// Active slide; inner `None` clears it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub active_slide_position: Option<Option<u32>>,
}

impl MetadataPatch {
    /// True when the patch carries no field at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Shallow-merge the present fields into `metadata`.
    pub fn apply_to(&self, metadata: &mut EventMetadata) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }

        set(&mut metadata.name, &self.name);
        set(&mut metadata.slug, &self.slug);
        set(&mut metadata.description, &self.description);
        set(&mut metadata.is_public, &self.is_public);
        set(&mut metadata.notes, &self.notes);
        if self.created_at.is_some() {
            metadata.created_at = self.created_at.clone();
        }
        if self.updated_at.is_some() {
            metadata.updated_at = self.updated_at.clone();
        }
        set(&mut metadata.active_playlist_id, &self.active_playlist_id);
        set(&mut metadata.active_song_id, &self.active_song_id);
        set(&mut metadata.active_slide_position, &self.active_slide_position);
    }
}

/// A single roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    /// Member's user id (roster key).
    pub user_id: Uuid,
    /// Role inside the event.
    pub role: ParticipantRole,
    /// Membership status.
    pub status: ParticipantStatus,
    /// When the user joined, if known.
    pub joined_at: Option<String>,
    /// Display name, hydrated separately from the roster.
    pub username: Option<String>,
}

impl Participant {
    /// Build an entry without timestamps or display name.
    pub fn new(user_id: Uuid, role: ParticipantRole, status: ParticipantStatus) -> Self {
        Self {
            user_id,
            role,
            status,
            joined_at: None,
            username: None,
        }
    }
}

/// Partial roster update carried by a participant UPDATE notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantPatch {
    /// New role.
    pub role: Option<ParticipantRole>,
    /// New status.
    pub status: Option<ParticipantStatus>,
    /// Join timestamp; inner `None` clears it.
    pub joined_at: Option<Option<String>>,
}

impl ParticipantPatch {
    /// Merge the present fields into `entry`.
    pub fn apply_to(&self, entry: &mut Participant) {
        if let Some(role) = self.role {
            entry.role = role;
        }
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(joined_at) = &self.joined_at {
            entry.joined_at = joined_at.clone();
        }
    }

    /// Turn the patch into a fresh entry when no row existed yet.
    pub fn into_participant(self, user_id: Uuid) -> Participant {
        let mut entry = Participant::new(
            user_id,
            ParticipantRole::Participant,
            ParticipantStatus::Invited,
        );
        self.apply_to(&mut entry);
        entry
    }
}

/// The synchronized view of one event and its roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventAggregate {
    /// Event identifier; never changes once loaded.
    pub event_id: Uuid,
    /// Creator of the event.
    pub owner_id: Uuid,
    /// Owner display name, tracked apart from the roster.
    pub owner_username: Option<String>,
    /// Descriptive and playback fields.
    pub metadata: EventMetadata,
    /// Roster keyed by user id.
    pub participants: IndexMap<Uuid, Participant>,
}

impl EventAggregate {
    /// Assemble an aggregate, collapsing duplicate user ids (last row wins) and
    /// normalizing the owner's entry.
    pub fn new(
        event_id: Uuid,
        owner_id: Uuid,
        metadata: EventMetadata,
        participants: impl IntoIterator<Item = Participant>,
    ) -> Self {
        let mut aggregate = Self {
            event_id,
            owner_id,
            owner_username: None,
            metadata,
            participants: IndexMap::new(),
        };
        aggregate.replace_participants(participants);
        aggregate
    }

    /// Swap the whole roster, keeping the owner invariant.
    pub fn replace_participants(&mut self, participants: impl IntoIterator<Item = Participant>) {
        self.participants = participants
            .into_iter()
            .map(|entry| (entry.user_id, entry))
            .collect();
        self.normalize_owner();
    }

    /// Ensure the owner is present with the owner role and a joined status, and keep the
    /// owner display name in sync with the owner's roster entry.
    pub fn normalize_owner(&mut self) {
        let owner_username = self.owner_username.clone();
        let entry = self
            .participants
            .entry(self.owner_id)
            .or_insert_with(|| {
                Participant::new(self.owner_id, ParticipantRole::Owner, ParticipantStatus::Joined)
            });
        entry.role = ParticipantRole::Owner;
        entry.status = ParticipantStatus::Joined;
        match (&entry.username, owner_username) {
            (None, Some(name)) => entry.username = Some(name),
            (Some(name), None) => self.owner_username = Some(name.clone()),
            _ => {}
        }
    }

    /// Role of `user`, if they are in the roster.
    pub fn role_of(&self, user: Uuid) -> Option<ParticipantRole> {
        self.participants.get(&user).map(|entry| entry.role)
    }

    /// Users whose profile changes matter for this event: the owner and every roster entry.
    pub fn relevant_user_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.participants.keys().copied().collect();
        if !ids.contains(&self.owner_id) {
            ids.push(self.owner_id);
        }
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn patch_keeps_unspecified_fields() {
        let mut metadata = EventMetadata {
            name: "Sunday service".into(),
            notes: Some("bring capo".into()),
            active_song_id: Some("s1".into()),
            ..EventMetadata::default()
        };

        MetadataPatch {
            active_slide_position: Some(Some(3)),
            ..MetadataPatch::default()
        }
        .apply_to(&mut metadata);

        assert_eq!(metadata.name, "Sunday service");
        assert_eq!(metadata.notes.as_deref(), Some("bring capo"));
        assert_eq!(metadata.active_song_id.as_deref(), Some("s1"));
        assert_eq!(metadata.active_slide_position, Some(3));
    }

    #[test]
    fn explicit_null_clears_nullable_field() {
        let mut metadata = EventMetadata {
            active_song_id: Some("s1".into()),
            ..EventMetadata::default()
        };
        let patch: MetadataPatch = serde_json::from_value(json!({ "active_song_id": null })).unwrap();
        assert_eq!(patch.active_song_id, Some(None));

        patch.apply_to(&mut metadata);
        assert_eq!(metadata.active_song_id, None);
    }

    #[test]
    fn patch_serializes_only_present_fields() {
        let patch = MetadataPatch {
            active_song_id: Some(None),
            active_slide_position: Some(Some(0)),
            ..MetadataPatch::default()
        };
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({ "active_song_id": null, "active_slide_position": 0 })
        );
    }

    #[test]
    fn owner_is_synthesized_when_missing() {
        let owner = Uuid::from_u128(1);
        let aggregate = EventAggregate::new(Uuid::from_u128(9), owner, EventMetadata::default(), []);

        let entry = aggregate.participants.get(&owner).unwrap();
        assert_eq!(entry.role, ParticipantRole::Owner);
        assert_eq!(entry.status, ParticipantStatus::Joined);
    }

    #[test]
    fn stale_owner_role_is_normalized() {
        let owner = Uuid::from_u128(1);
        let aggregate = EventAggregate::new(
            Uuid::from_u128(9),
            owner,
            EventMetadata::default(),
            [Participant::new(owner, ParticipantRole::Participant, ParticipantStatus::Left)],
        );

        assert_eq!(aggregate.role_of(owner), Some(ParticipantRole::Owner));
        assert_eq!(aggregate.participants.len(), 1);
    }

    #[test]
    fn duplicate_rows_collapse_to_last() {
        let user = Uuid::from_u128(2);
        let aggregate = EventAggregate::new(
            Uuid::from_u128(9),
            Uuid::from_u128(1),
            EventMetadata::default(),
            [
                Participant::new(user, ParticipantRole::Participant, ParticipantStatus::Invited),
                Participant::new(user, ParticipantRole::Admin, ParticipantStatus::Joined),
            ],
        );

        assert_eq!(aggregate.participants.len(), 2);
        assert_eq!(aggregate.role_of(user), Some(ParticipantRole::Admin));
    }

    #[test]
    fn playlist_admin_accepts_dashed_spelling() {
        let role: ParticipantRole = serde_json::from_value(json!("playlist-admin")).unwrap();
        assert_eq!(role, ParticipantRole::PlaylistAdmin);
        assert!(role.can_manage_playlist());
        assert!(!role.can_manage_event());
    }
}

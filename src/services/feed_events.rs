//! Pure decoding and folding of change notifications into the event aggregate.
//!
//! Every notification is first decoded into a [`FeedUpdate`] (dropping the ones that
//! belong to another event) and then folded with [`reduce`], which returns the next
//! aggregate or `None` when the update changes nothing.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::{
        feed::{ChangeEvent, ChangeKind, FeedTable},
        models::{EventRow, ParticipantRow, ProfileRow, Row, validate_slug},
    },
    state::aggregate::{EventAggregate, MetadataPatch, Participant, ParticipantPatch},
};

/// A change notification translated into the aggregate's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedUpdate {
    /// Metadata fields changed.
    Metadata(MetadataPatch),
    /// A roster row appeared.
    ParticipantInserted(Participant),
    /// A roster row changed.
    ParticipantUpdated {
        /// Roster key.
        user_id: Uuid,
        /// Fields carried by the notification.
        patch: ParticipantPatch,
    },
    /// A roster row disappeared.
    ParticipantDeleted(Uuid),
    /// A user's display name changed.
    ProfileRenamed {
        /// Profile id.
        user_id: Uuid,
        /// New display name.
        username: Option<String>,
    },
}

/// Why a notification could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The notification carries no row snapshot to read from.
    #[error("{kind:?} notification on `{table}` carries no row")]
    MissingRow { table: FeedTable, kind: ChangeKind },
    /// The row is malformed beyond recovery.
    #[error("invalid `{table}` row: {reason}")]
    InvalidRow { table: FeedTable, reason: String },
    /// None of the row's fields is a recognized metadata field.
    #[error("metadata row holds no recognized field")]
    NoRecognizedField,
}

/// Decode `event` received on `table` for the aggregate identified by `event_id`.
///
/// Returns `Ok(None)` for notifications that do not concern the aggregate: rows of another
/// event, and change kinds the aggregate does not react to.
pub fn decode(
    table: FeedTable,
    event: &ChangeEvent,
    event_id: Uuid,
) -> Result<Option<FeedUpdate>, DecodeError> {
    match table {
        FeedTable::Events => decode_metadata(event, event_id),
        FeedTable::EventParticipants => decode_participant(event, event_id),
        FeedTable::Profiles => decode_profile(event),
    }
}

fn decode_metadata(event: &ChangeEvent, event_id: Uuid) -> Result<Option<FeedUpdate>, DecodeError> {
    if event.kind != ChangeKind::Update {
        return Ok(None);
    }
    let row = event.new.as_ref().ok_or(DecodeError::MissingRow {
        table: FeedTable::Events,
        kind: event.kind,
    })?;
    if uuid_column(row, "id") != Some(event_id) {
        return Ok(None);
    }

    metadata_patch_from_row(row).map(|patch| Some(FeedUpdate::Metadata(patch)))
}

/// Build a metadata patch from an `events` row.
///
/// Only columns present in the row are patched, so omitted fields keep their value. Each
/// recognized column holding a well-typed value is kept and the rest is skipped; a row with
/// no usable field is rejected.
pub fn metadata_patch_from_row(row: &Row) -> Result<MetadataPatch, DecodeError> {
    if let Err(reason) = EventRow::from_row(row) {
        warn!(%reason, "metadata row failed validation; merging recognized fields");
    }

    let patch = MetadataPatch {
        name: required(row, "name").filter(|name: &String| !name.trim().is_empty()),
        slug: required(row, "slug").filter(|slug: &String| validate_slug(slug).is_ok()),
        description: nullable(row, "description"),
        is_public: required(row, "is_public"),
        notes: nullable(row, "notes"),
        created_at: required(row, "created_at"),
        updated_at: required(row, "updated_at"),
        active_playlist_id: nullable(row, "active_playlist_id"),
        active_song_id: nullable(row, "active_song_id"),
        active_slide_position: nullable(row, "active_slide_position"),
    };

    if patch.is_empty() {
        return Err(DecodeError::NoRecognizedField);
    }
    Ok(patch)
}

fn decode_participant(
    event: &ChangeEvent,
    event_id: Uuid,
) -> Result<Option<FeedUpdate>, DecodeError> {
    let table = FeedTable::EventParticipants;
    let missing = DecodeError::MissingRow {
        table,
        kind: event.kind,
    };
    let invalid = |reason: String| DecodeError::InvalidRow { table, reason };

    match event.kind {
        ChangeKind::Insert => {
            let row = event.new.as_ref().ok_or(missing)?;
            if uuid_column(row, "event_id") != Some(event_id) {
                return Ok(None);
            }
            let parsed: ParticipantRow = serde_json::from_value(Value::Object(row.clone()))
                .map_err(|err| invalid(err.to_string()))?;
            Ok(Some(FeedUpdate::ParticipantInserted(parsed.into())))
        }
        ChangeKind::Update => {
            let row = event.new.as_ref().ok_or(missing)?;
            if uuid_column(row, "event_id") != Some(event_id) {
                return Ok(None);
            }
            let user_id =
                uuid_column(row, "user_id").ok_or_else(|| invalid("missing user_id".into()))?;
            let patch = ParticipantPatch {
                role: required(row, "role"),
                status: required(row, "status"),
                joined_at: nullable(row, "joined_at"),
            };
            Ok(Some(FeedUpdate::ParticipantUpdated { user_id, patch }))
        }
        ChangeKind::Delete => {
            let row = event.old.as_ref().ok_or(missing)?;
            // Delete snapshots may only carry the primary key; a missing event id is accepted.
            if row.contains_key("event_id") && uuid_column(row, "event_id") != Some(event_id) {
                return Ok(None);
            }
            let user_id =
                uuid_column(row, "user_id").ok_or_else(|| invalid("missing user_id".into()))?;
            Ok(Some(FeedUpdate::ParticipantDeleted(user_id)))
        }
    }
}

fn decode_profile(event: &ChangeEvent) -> Result<Option<FeedUpdate>, DecodeError> {
    if event.kind != ChangeKind::Update {
        return Ok(None);
    }
    let row = event.new.as_ref().ok_or(DecodeError::MissingRow {
        table: FeedTable::Profiles,
        kind: event.kind,
    })?;
    let profile: ProfileRow =
        serde_json::from_value(Value::Object(row.clone())).map_err(|err| {
            DecodeError::InvalidRow {
                table: FeedTable::Profiles,
                reason: err.to_string(),
            }
        })?;

    Ok(Some(FeedUpdate::ProfileRenamed {
        user_id: profile.id,
        username: profile.username,
    }))
}

/// Fold `update` into `aggregate`, returning the next aggregate when something changed.
pub fn reduce(aggregate: &EventAggregate, update: &FeedUpdate) -> Option<EventAggregate> {
    match update {
        FeedUpdate::Metadata(patch) => {
            let mut metadata = aggregate.metadata.clone();
            patch.apply_to(&mut metadata);
            (metadata != aggregate.metadata).then(|| EventAggregate {
                metadata,
                ..aggregate.clone()
            })
        }
        FeedUpdate::ParticipantInserted(entry) => {
            if aggregate.participants.contains_key(&entry.user_id) {
                return None;
            }
            let mut next = aggregate.clone();
            next.participants.insert(entry.user_id, entry.clone());
            next.normalize_owner();
            Some(next)
        }
        FeedUpdate::ParticipantUpdated { user_id, patch } => {
            let mut next = aggregate.clone();
            match next.participants.get_mut(user_id) {
                Some(entry) => patch.apply_to(entry),
                None => {
                    next.participants
                        .insert(*user_id, patch.clone().into_participant(*user_id));
                }
            }
            next.normalize_owner();
            (next != *aggregate).then_some(next)
        }
        FeedUpdate::ParticipantDeleted(user_id) => {
            if *user_id == aggregate.owner_id || !aggregate.participants.contains_key(user_id) {
                return None;
            }
            let mut next = aggregate.clone();
            next.participants.shift_remove(user_id);
            Some(next)
        }
        FeedUpdate::ProfileRenamed { user_id, username } => {
            let mut next = aggregate.clone();
            if let Some(entry) = next.participants.get_mut(user_id) {
                entry.username = username.clone();
            }
            if *user_id == next.owner_id {
                next.owner_username = username.clone();
            }
            (next != *aggregate).then_some(next)
        }
    }
}

fn uuid_column(row: &Row, column: &str) -> Option<Uuid> {
    row.get(column)
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

/// Value of a non-nullable column; absent, null and ill-typed values are skipped.
fn required<T: DeserializeOwned>(row: &Row, column: &str) -> Option<T> {
    match row.get(column) {
        None | Some(Value::Null) => None,
        Some(value) => typed(column, value),
    }
}

/// Value of a nullable column: `Some(None)` for an explicit null.
fn nullable<T: DeserializeOwned>(row: &Row, column: &str) -> Option<Option<T>> {
    match row.get(column) {
        None => None,
        Some(Value::Null) => Some(None),
        Some(value) => typed(column, value).map(Some),
    }
}

fn typed<T: DeserializeOwned>(column: &str, value: &Value) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(column, error = %err, "skipping ill-typed column");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::state::{
        aggregate::{EventMetadata, ParticipantRole},
        participant::ParticipantStatus,
    };

    const EVENT: Uuid = Uuid::from_u128(100);
    const OWNER: Uuid = Uuid::from_u128(1);
    const USER: Uuid = Uuid::from_u128(2);

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn aggregate() -> EventAggregate {
        EventAggregate::new(
            EVENT,
            OWNER,
            EventMetadata {
                name: "Vigil".into(),
                slug: "vigil".into(),
                ..EventMetadata::default()
            },
            [],
        )
    }

    fn fold(mut aggregate: EventAggregate, table: FeedTable, events: &[ChangeEvent]) -> EventAggregate {
        for event in events {
            if let Ok(Some(update)) = decode(table, event, aggregate.event_id) {
                if let Some(next) = reduce(&aggregate, &update) {
                    aggregate = next;
                }
            }
        }
        aggregate
    }

    fn roster_row(user: Uuid, role: &str, status: &str) -> Row {
        row(json!({
            "event_id": EVENT.to_string(),
            "user_id": user.to_string(),
            "role": role,
            "status": status,
        }))
    }

    #[test]
    fn disjoint_metadata_updates_accumulate() {
        let events = [
            ChangeEvent::update(row(json!({ "id": EVENT.to_string(), "notes": "n1" })), None),
            ChangeEvent::update(
                row(json!({ "id": EVENT.to_string(), "active_song_id": "s1" })),
                None,
            ),
            ChangeEvent::update(
                row(json!({ "id": EVENT.to_string(), "active_slide_position": 2 })),
                None,
            ),
            ChangeEvent::update(row(json!({ "id": EVENT.to_string(), "notes": "n2" })), None),
        ];

        let merged = fold(aggregate(), FeedTable::Events, &events);
        assert_eq!(merged.metadata.name, "Vigil");
        assert_eq!(merged.metadata.notes.as_deref(), Some("n2"));
        assert_eq!(merged.metadata.active_song_id.as_deref(), Some("s1"));
        assert_eq!(merged.metadata.active_slide_position, Some(2));
    }

    #[test]
    fn partially_valid_row_merges_recognized_subset() {
        let patch = metadata_patch_from_row(&row(json!({
            "id": EVENT.to_string(),
            "name": "",
            "active_slide_position": "not a number",
            "active_song_id": "s7",
            "unknown_column": true,
        })))
        .unwrap();

        assert_eq!(patch.name, None);
        assert_eq!(patch.active_slide_position, None);
        assert_eq!(patch.active_song_id, Some(Some("s7".into())));
    }

    #[test]
    fn full_shape_row_keeps_omitted_fields() {
        let mut start = aggregate();
        start.metadata.notes = Some("capo 2".into());
        start.metadata.is_public = true;
        start.metadata.active_slide_position = Some(4);
        start.metadata.active_playlist_id = Some("p1".into());

        let update = ChangeEvent::update(
            row(json!({
                "id": EVENT.to_string(),
                "owner_id": OWNER.to_string(),
                "name": "Vigil",
                "slug": "vigil",
                "active_song_id": "s2",
            })),
            None,
        );
        let merged = fold(start, FeedTable::Events, &[update]);

        assert_eq!(merged.metadata.active_song_id.as_deref(), Some("s2"));
        assert_eq!(merged.metadata.notes.as_deref(), Some("capo 2"));
        assert_eq!(merged.metadata.active_slide_position, Some(4));
        assert_eq!(merged.metadata.active_playlist_id.as_deref(), Some("p1"));
        assert!(merged.metadata.is_public);
    }

    #[test]
    fn explicit_null_in_full_shape_row_clears_field() {
        let patch = metadata_patch_from_row(&row(json!({
            "id": EVENT.to_string(),
            "owner_id": OWNER.to_string(),
            "name": "Vigil",
            "slug": "vigil",
            "notes": null,
        })))
        .unwrap();

        assert_eq!(patch.notes, Some(None));
        assert_eq!(patch.description, None);
        assert_eq!(patch.is_public, None);
    }

    #[test]
    fn row_without_recognized_fields_is_rejected() {
        let result = metadata_patch_from_row(&row(json!({ "id": EVENT.to_string(), "x": 1 })));
        assert_eq!(result, Err(DecodeError::NoRecognizedField));
    }

    #[test]
    fn notifications_for_other_events_are_dropped() {
        let other = Uuid::from_u128(999);
        let metadata = ChangeEvent::update(
            row(json!({ "id": other.to_string(), "notes": "leak" })),
            None,
        );
        assert_eq!(decode(FeedTable::Events, &metadata, EVENT), Ok(None));

        let mut roster = roster_row(USER, "participant", "joined");
        roster.insert("event_id".into(), json!(other.to_string()));
        assert_eq!(
            decode(FeedTable::EventParticipants, &ChangeEvent::insert(roster), EVENT),
            Ok(None)
        );
    }

    #[test]
    fn insert_is_idempotent_and_delete_removes() {
        let insert = ChangeEvent::insert(roster_row(USER, "participant", "joined"));
        let merged = fold(
            aggregate(),
            FeedTable::EventParticipants,
            &[insert.clone(), insert],
        );
        assert_eq!(merged.participants.len(), 2);

        let delete = ChangeEvent::delete(roster_row(USER, "participant", "joined"));
        let merged = fold(merged, FeedTable::EventParticipants, &[delete]);
        assert!(!merged.participants.contains_key(&USER));
    }

    #[test]
    fn delete_before_insert_is_noop() {
        let start = aggregate();
        let delete = ChangeEvent::delete(row(json!({ "user_id": USER.to_string() })));
        let update = decode(FeedTable::EventParticipants, &delete, EVENT)
            .unwrap()
            .unwrap();
        assert_eq!(reduce(&start, &update), None);
    }

    #[test]
    fn update_without_entry_inserts() {
        let update = ChangeEvent::update(
            row(json!({
                "event_id": EVENT.to_string(),
                "user_id": USER.to_string(),
                "status": "left",
            })),
            None,
        );
        let merged = fold(aggregate(), FeedTable::EventParticipants, &[update]);
        let entry = &merged.participants[&USER];
        assert_eq!(entry.status, ParticipantStatus::Left);
        assert_eq!(entry.role, ParticipantRole::Participant);
    }

    #[test]
    fn update_merges_into_existing_entry() {
        let mut start = aggregate();
        let mut entry = Participant::new(USER, ParticipantRole::Participant, ParticipantStatus::Joined);
        entry.username = Some("bea".into());
        entry.joined_at = Some("2025-04-01T10:00:00Z".into());
        start.participants.insert(USER, entry);

        let update = ChangeEvent::update(
            row(json!({
                "event_id": EVENT.to_string(),
                "user_id": USER.to_string(),
                "role": "admin",
            })),
            None,
        );
        let merged = fold(start, FeedTable::EventParticipants, &[update]);
        let entry = &merged.participants[&USER];
        assert_eq!(entry.role, ParticipantRole::Admin);
        assert_eq!(entry.status, ParticipantStatus::Joined);
        assert_eq!(entry.username.as_deref(), Some("bea"));
        assert_eq!(entry.joined_at.as_deref(), Some("2025-04-01T10:00:00Z"));
    }

    #[test]
    fn owner_row_role_change_is_normalized() {
        let update = ChangeEvent::update(roster_row(OWNER, "participant", "left"), None);
        let merged = fold(aggregate(), FeedTable::EventParticipants, &[update]);
        assert_eq!(merged.role_of(OWNER), Some(ParticipantRole::Owner));
        assert_eq!(merged.participants[&OWNER].status, ParticipantStatus::Joined);

        let delete = ChangeEvent::delete(roster_row(OWNER, "owner", "joined"));
        let merged = fold(merged, FeedTable::EventParticipants, &[delete]);
        assert_eq!(merged.role_of(OWNER), Some(ParticipantRole::Owner));
    }

    #[test]
    fn profile_rename_updates_participant_and_owner() {
        let start = fold(
            aggregate(),
            FeedTable::EventParticipants,
            &[ChangeEvent::insert(roster_row(USER, "participant", "joined"))],
        );
        let events = [
            ChangeEvent::update(row(json!({ "id": USER.to_string(), "username": "cato" })), None),
            ChangeEvent::update(row(json!({ "id": OWNER.to_string(), "username": "olga" })), None),
        ];
        let merged = fold(start, FeedTable::Profiles, &events);

        assert_eq!(merged.participants[&USER].username.as_deref(), Some("cato"));
        assert_eq!(merged.owner_username.as_deref(), Some("olga"));
        assert_eq!(merged.participants[&OWNER].username.as_deref(), Some("olga"));
    }

    #[test]
    fn rename_of_unrelated_user_changes_nothing() {
        let start = aggregate();
        let update = FeedUpdate::ProfileRenamed {
            user_id: Uuid::from_u128(77),
            username: Some("stranger".into()),
        };
        assert_eq!(reduce(&start, &update), None);
    }

    #[test]
    fn malformed_roster_insert_is_an_error() {
        let insert = ChangeEvent::insert(row(json!({
            "event_id": EVENT.to_string(),
            "user_id": USER.to_string(),
            "role": "emperor",
            "status": "joined",
        })));
        assert!(matches!(
            decode(FeedTable::EventParticipants, &insert, EVENT),
            Err(DecodeError::InvalidRow { .. })
        ));
    }
}

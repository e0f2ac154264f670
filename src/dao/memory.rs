use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::{
        feed::{ChangeEvent, FeedTable, LocalChangeFeed},
        models::{EventPatch, InviteRequest, KickRequest, ProfileRow, Row, SlideRow, SongRow},
        repository::{Delivery, EventRepository},
        storage::{StorageError, StorageResult},
    },
    state::participant::ParticipantStatus,
};

/// Seed data for [`MemoryRepository`], loadable from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryFixture {
    /// Rows of the `events` table.
    #[serde(default)]
    pub events: Vec<Row>,
    /// Rows of the `event_participants` table.
    #[serde(default)]
    pub participants: Vec<Row>,
    /// Rows of the `profiles` table.
    #[serde(default)]
    pub profiles: Vec<ProfileRow>,
    /// Songs keyed by playlist id.
    #[serde(default)]
    pub playlist_songs: HashMap<String, Vec<SongRow>>,
    /// Slides of every song.
    #[serde(default)]
    pub slides: Vec<SlideRow>,
}

/// Backend kept entirely in memory. Writes are echoed on the attached
/// [`LocalChangeFeed`] the way database triggers would.
#[derive(Clone)]
pub struct MemoryRepository {
    tables: Arc<RwLock<MemoryFixture>>,
    feed: Option<Arc<LocalChangeFeed>>,
    saves: Arc<Mutex<Vec<(EventPatch, Delivery)>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryRepository {
    /// Build a repository from seed data.
    pub fn new(fixture: MemoryFixture) -> Self {
        Self {
            tables: Arc::new(RwLock::new(fixture)),
            feed: None,
            saves: Arc::new(Mutex::new(Vec::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Echo writes on `feed`.
    pub fn with_feed(mut self, feed: Arc<LocalChangeFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Make every write fail with a network error until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every save request received so far, including failed ones.
    pub async fn saved_patches(&self) -> Vec<(EventPatch, Delivery)> {
        self.saves.lock().await.clone()
    }

    /// Change a user's display name and notify profile subscribers.
    pub async fn rename_user(&self, id: Uuid, username: &str) {
        let mut tables = self.tables.write().await;
        let profile = ProfileRow {
            id,
            username: Some(username.to_string()),
        };
        match tables.profiles.iter_mut().find(|existing| existing.id == id) {
            Some(existing) => *existing = profile.clone(),
            None => tables.profiles.push(profile.clone()),
        }
        drop(tables);

        if let Ok(Value::Object(row)) = serde_json::to_value(&profile) {
            self.emit(FeedTable::Profiles, ChangeEvent::update(row, None));
        }
    }

    /// Delete a roster row and notify roster subscribers.
    pub async fn remove_participant(&self, event_id: Uuid, user_id: Uuid) {
        let mut tables = self.tables.write().await;
        let position = tables
            .participants
            .iter()
            .position(|row| is_roster_row(row, event_id, user_id));
        let removed = position.map(|index| tables.participants.remove(index));
        drop(tables);

        if let Some(row) = removed {
            self.emit(FeedTable::EventParticipants, ChangeEvent::delete(row));
        }
    }

    fn emit(&self, table: FeedTable, event: ChangeEvent) {
        if let Some(feed) = &self.feed {
            let delivered = feed.publish(table, event);
            debug!(%table, delivered, "memory store emitted change");
        }
    }

    fn check_writable(&self, path: &str) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                path.to_string(),
                std::io::Error::other("memory store configured to fail writes"),
            ));
        }
        Ok(())
    }

    async fn upsert_roster_row(&self, event_id: Uuid, user_id: Uuid, fields: Row) -> bool {
        let mut tables = self.tables.write().await;
        let existing = tables
            .participants
            .iter_mut()
            .find(|row| is_roster_row(row, event_id, user_id));
        let event = match existing {
            Some(row) => {
                let old = row.clone();
                row.extend(fields);
                ChangeEvent::update(row.clone(), Some(old))
            }
            None => {
                let mut row = Row::new();
                row.insert("event_id".into(), Value::String(event_id.to_string()));
                row.insert("user_id".into(), Value::String(user_id.to_string()));
                row.extend(fields);
                tables.participants.push(row.clone());
                ChangeEvent::insert(row)
            }
        };
        drop(tables);

        let inserted = event.old.is_none();
        self.emit(FeedTable::EventParticipants, event);
        inserted
    }
}

fn has_id(row: &Row, column: &str, id: Uuid) -> bool {
    row.get(column).and_then(Value::as_str) == Some(id.to_string().as_str())
}

fn is_roster_row(row: &Row, event_id: Uuid, user_id: Uuid) -> bool {
    has_id(row, "event_id", event_id) && has_id(row, "user_id", user_id)
}

fn to_row(value: impl serde::Serialize) -> Row {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => row,
        _ => Row::new(),
    }
}

impl EventRepository for MemoryRepository {
    fn fetch_event_by_slug(&self, slug: &str) -> BoxFuture<'static, StorageResult<Option<Row>>> {
        let tables = self.tables.clone();
        let slug = slug.to_string();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables
                .events
                .iter()
                .find(|row| row.get("slug").and_then(Value::as_str) == Some(slug.as_str()))
                .cloned())
        })
    }

    fn fetch_participants(&self, event_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<Row>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables
                .participants
                .iter()
                .filter(|row| has_id(row, "event_id", event_id))
                .cloned()
                .collect())
        })
    }

    fn fetch_profiles(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<Vec<ProfileRow>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables
                .profiles
                .iter()
                .filter(|profile| ids.contains(&profile.id))
                .cloned()
                .collect())
        })
    }

    fn fetch_playlist_songs(
        &self,
        playlist_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<SongRow>>> {
        let tables = self.tables.clone();
        let playlist_id = playlist_id.to_string();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables
                .playlist_songs
                .get(&playlist_id)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn fetch_song_slides(
        &self,
        song_ids: Vec<String>,
    ) -> BoxFuture<'static, StorageResult<Vec<SlideRow>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables
                .slides
                .iter()
                .filter(|slide| song_ids.contains(&slide.song_id))
                .cloned()
                .collect())
        })
    }

    fn save_event(
        &self,
        patch: EventPatch,
        delivery: Delivery,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let repo = self.clone();
        Box::pin(async move {
            repo.saves.lock().await.push((patch.clone(), delivery));
            repo.check_writable("events")?;

            let mut tables = repo.tables.write().await;
            let Some(row) = tables
                .events
                .iter_mut()
                .find(|row| has_id(row, "id", patch.event_id))
            else {
                return Err(StorageError::Rejected {
                    path: "events".into(),
                    status: 404,
                });
            };
            let old = row.clone();
            row.extend(to_row(&patch.fields));
            let event = ChangeEvent::update(row.clone(), Some(old));
            drop(tables);

            repo.emit(FeedTable::Events, event);
            Ok(())
        })
    }

    fn invite_participant(&self, request: InviteRequest) -> BoxFuture<'static, StorageResult<()>> {
        let repo = self.clone();
        Box::pin(async move {
            repo.check_writable("event_participants")?;
            let fields = to_row(serde_json::json!({
                "role": request.role,
                "status": request.status,
            }));
            repo.upsert_roster_row(request.event_id, request.user_id, fields)
                .await;
            Ok(())
        })
    }

    fn kick_participant(&self, request: KickRequest) -> BoxFuture<'static, StorageResult<()>> {
        let repo = self.clone();
        Box::pin(async move {
            repo.check_writable("event_participants")?;
            let known = repo
                .tables
                .read()
                .await
                .participants
                .iter()
                .any(|row| is_roster_row(row, request.event_id, request.user_id));
            if !known {
                return Err(StorageError::Rejected {
                    path: "event_participants".into(),
                    status: 404,
                });
            }
            let fields = to_row(serde_json::json!({ "status": ParticipantStatus::Kicked }));
            repo.upsert_roster_row(request.event_id, request.user_id, fields)
                .await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::{
        dao::feed::{ChangeFeed, ChangeKind, RowFilter},
        state::aggregate::{MetadataPatch, ParticipantRole},
    };

    const EVENT: Uuid = Uuid::from_u128(100);
    const OWNER: Uuid = Uuid::from_u128(1);
    const GUEST: Uuid = Uuid::from_u128(2);

    fn repository() -> (MemoryRepository, Arc<LocalChangeFeed>) {
        let fixture: MemoryFixture = serde_json::from_value(json!({
            "events": [{ "id": EVENT.to_string(), "owner_id": OWNER.to_string(), "slug": "vigil" }],
            "participants": [{
                "event_id": EVENT.to_string(),
                "user_id": GUEST.to_string(),
                "role": "participant",
                "status": "joined"
            }]
        }))
        .unwrap();
        let feed = Arc::new(LocalChangeFeed::new(16));
        (MemoryRepository::new(fixture).with_feed(feed.clone()), feed)
    }

    #[tokio::test]
    async fn save_merges_fields_and_echoes_update() {
        let (repository, feed) = repository();
        let mut events = feed
            .subscribe("t".into(), FeedTable::Events, RowFilter::eq("id", EVENT))
            .await
            .unwrap();

        let patch = EventPatch {
            event_id: EVENT,
            fields: MetadataPatch {
                active_slide_position: Some(Some(3)),
                ..MetadataPatch::default()
            },
        };
        repository
            .save_event(patch.clone(), Delivery::KeepAlive)
            .await
            .unwrap();

        let echoed = events.next().await.unwrap();
        assert_eq!(echoed.kind, ChangeKind::Update);
        assert_eq!(echoed.column("active_slide_position"), Some(&json!(3)));
        assert_eq!(echoed.column("slug"), Some(&json!("vigil")));
        assert_eq!(
            repository.saved_patches().await,
            vec![(patch, Delivery::KeepAlive)]
        );
    }

    #[tokio::test]
    async fn failing_writes_are_recorded_but_rejected() {
        let (repository, _feed) = repository();
        repository.set_fail_writes(true);

        let patch = EventPatch {
            event_id: EVENT,
            fields: MetadataPatch::default(),
        };
        let result = repository.save_event(patch, Delivery::Standard).await;

        assert!(matches!(result, Err(StorageError::Unavailable { .. })));
        assert_eq!(repository.saved_patches().await.len(), 1);
    }

    #[tokio::test]
    async fn invite_inserts_and_kick_updates_roster() {
        let (repository, _feed) = repository();
        let newcomer = Uuid::from_u128(3);

        repository
            .invite_participant(InviteRequest {
                event_id: EVENT,
                user_id: newcomer,
                role: ParticipantRole::Participant,
                status: ParticipantStatus::Invited,
            })
            .await
            .unwrap();
        repository
            .kick_participant(KickRequest {
                event_id: EVENT,
                user_id: GUEST,
                status: ParticipantStatus::Kicked,
            })
            .await
            .unwrap();

        let rows = repository.fetch_participants(EVENT).await.unwrap();
        assert_eq!(rows.len(), 2);
        let guest = rows
            .iter()
            .find(|row| has_id(row, "user_id", GUEST))
            .unwrap();
        assert_eq!(guest.get("status"), Some(&json!("kicked")));

        let missing = repository
            .kick_participant(KickRequest {
                event_id: EVENT,
                user_id: Uuid::from_u128(9),
                status: ParticipantStatus::Kicked,
            })
            .await;
        assert!(matches!(missing, Err(StorageError::Rejected { status: 404, .. })));
    }
}

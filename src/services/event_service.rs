//! Loading of the event aggregate and the discrete admin actions run against it.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{EventPatch, EventRow, InviteRequest, KickRequest, ParticipantRow},
        repository::{Delivery, EventRepository},
    },
    error::ServiceError,
    services::{action_runner::ActionRunner, view::SongCatalog},
    state::{
        action::LoadState,
        aggregate::{EventAggregate, MetadataPatch, Participant, ParticipantRole},
        participant::{ParticipantAction, ParticipantStatus, transition},
        store::{AggregateSnapshot, AggregateStore},
    },
};

/// Fetches the aggregate into the store and runs admin actions on behalf of the viewer.
pub struct EventService {
    repository: Arc<dyn EventRepository>,
    store: Arc<AggregateStore>,
    runner: ActionRunner,
    viewer: Option<Uuid>,
    slug: RwLock<Option<String>>,
    load_state: watch::Sender<LoadState>,
    catalog: watch::Sender<Option<Arc<SongCatalog>>>,
}

impl EventService {
    /// Create a service acting as `viewer`.
    pub fn new(
        repository: Arc<dyn EventRepository>,
        store: Arc<AggregateStore>,
        runner: ActionRunner,
        viewer: Option<Uuid>,
    ) -> Self {
        let (load_state, _rx) = watch::channel(LoadState::Idle);
        let (catalog, _rx) = watch::channel(None);
        Self {
            repository,
            store,
            runner,
            viewer,
            slug: RwLock::new(None),
            load_state,
            catalog,
        }
    }

    /// User the service acts for.
    pub fn viewer(&self) -> Option<Uuid> {
        self.viewer
    }

    /// Current loading state of the aggregate.
    pub fn load_state(&self) -> LoadState {
        self.load_state.borrow().clone()
    }

    /// Observe loading state changes.
    pub fn subscribe_load_state(&self) -> watch::Receiver<LoadState> {
        self.load_state.subscribe()
    }

    /// Catalog of the active playlist, once loaded.
    pub fn catalog(&self) -> Option<Arc<SongCatalog>> {
        self.catalog.borrow().clone()
    }

    /// Observe catalog replacements.
    pub fn subscribe_catalog(&self) -> watch::Receiver<Option<Arc<SongCatalog>>> {
        self.catalog.subscribe()
    }

    fn current_slug(&self) -> Option<String> {
        self.slug
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Fetch the event for `slug` with its roster and publish it into the store.
    ///
    /// A missing or malformed event row fails the whole load; malformed roster rows are
    /// skipped and missing profiles leave display names empty.
    pub async fn load_event(&self, slug: &str) -> Result<Arc<EventAggregate>, ServiceError> {
        self.load_state.send_replace(LoadState::Loading);
        match self.fetch_aggregate(slug).await {
            Ok(aggregate) => {
                *self
                    .slug
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(slug.to_string());
                self.store.load(aggregate);
                self.load_state.send_replace(LoadState::Ready);
                info!(slug, "event loaded");
                self.store.get().ok_or(ServiceError::Degraded)
            }
            Err(err) => {
                warn!(slug, error = %err, "failed to load event");
                self.load_state
                    .send_replace(LoadState::Failed(err.user_message()));
                Err(err)
            }
        }
    }

    /// Re-fetch the current event and replace the stored aggregate.
    pub async fn refresh(&self) -> Result<(), ServiceError> {
        let slug = self.current_slug().ok_or(ServiceError::Degraded)?;
        let aggregate = self.fetch_aggregate(&slug).await?;
        self.store.load(aggregate);
        self.load_state.send_replace(LoadState::Ready);
        debug!(slug, "event refreshed");
        Ok(())
    }

    /// Forget the loaded event.
    pub fn unload(&self) {
        self.store.clear();
        self.catalog.send_replace(None);
        self.load_state.send_replace(LoadState::Idle);
        *self
            .slug
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    async fn fetch_aggregate(&self, slug: &str) -> Result<EventAggregate, ServiceError> {
        let row = self
            .repository
            .fetch_event_by_slug(slug)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Event `{slug}`")))?;
        let event = EventRow::from_row(&row).map_err(ServiceError::InvalidData)?;

        let participants: Vec<Participant> = self
            .repository
            .fetch_participants(event.id)
            .await?
            .into_iter()
            .filter_map(|row| {
                match serde_json::from_value::<ParticipantRow>(Value::Object(row)) {
                    Ok(parsed) if parsed.event_id == event.id => Some(parsed.into()),
                    Ok(parsed) => {
                        warn!(user_id = %parsed.user_id, "skipping roster row of another event");
                        None
                    }
                    Err(err) => {
                        warn!(error = %err, "skipping malformed roster row");
                        None
                    }
                }
            })
            .collect();

        let mut aggregate =
            EventAggregate::new(event.id, event.owner_id, event.metadata(), participants);

        match self
            .repository
            .fetch_profiles(aggregate.relevant_user_ids())
            .await
        {
            Ok(profiles) => {
                for profile in profiles {
                    if profile.id == aggregate.owner_id {
                        aggregate.owner_username = profile.username.clone();
                    }
                    if let Some(entry) = aggregate.participants.get_mut(&profile.id) {
                        entry.username = profile.username;
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to hydrate usernames"),
        }
        aggregate.normalize_owner();

        Ok(aggregate)
    }

    fn require_role(
        &self,
        allowed: fn(ParticipantRole) -> bool,
        action: &str,
    ) -> Result<Arc<EventAggregate>, ServiceError> {
        let aggregate = self.store.get().ok_or(ServiceError::Degraded)?;
        let role = match self.viewer {
            Some(viewer) if viewer == aggregate.owner_id => Some(ParticipantRole::Owner),
            Some(viewer) => aggregate
                .participants
                .get(&viewer)
                .filter(|entry| entry.status != ParticipantStatus::Kicked)
                .map(|entry| entry.role),
            None => None,
        };
        if role.is_some_and(allowed) {
            Ok(aggregate)
        } else {
            Err(ServiceError::Unauthorized(format!(
                "your role does not allow you to {action}"
            )))
        }
    }

    /// Invite `user_id` with `role`, or change the role of an existing participant.
    pub async fn invite(&self, user_id: Uuid, role: ParticipantRole) -> Result<(), ServiceError> {
        let action = async {
            let aggregate = self.require_role(ParticipantRole::can_manage_event, "invite")?;
            if role == ParticipantRole::Owner || user_id == aggregate.owner_id {
                return Err(ServiceError::InvalidData(
                    "the owner role cannot be assigned".into(),
                ));
            }
            let status = match aggregate.participants.get(&user_id) {
                Some(entry) if entry.status == ParticipantStatus::Kicked => {
                    return Err(ServiceError::Unauthorized(
                        "kicked participants cannot be invited again".into(),
                    ));
                }
                Some(entry) => transition(entry.status, ParticipantAction::Invite),
                None => ParticipantStatus::Invited,
            };

            self.repository
                .invite_participant(InviteRequest {
                    event_id: aggregate.event_id,
                    user_id,
                    role,
                    status,
                })
                .await
                .map_err(ServiceError::from)
        };

        self.runner
            .run(
                "invite",
                action,
                Some(Box::pin(self.refresh())),
                Some("Invitation sent".into()),
            )
            .await
    }

    /// Remove `user_id` from the event for good.
    pub async fn kick(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let action = async {
            let aggregate = self.require_role(ParticipantRole::can_manage_event, "kick")?;
            if user_id == aggregate.owner_id {
                return Err(ServiceError::InvalidData(
                    "the owner cannot be kicked".into(),
                ));
            }
            let entry = aggregate
                .participants
                .get(&user_id)
                .ok_or_else(|| ServiceError::NotFound("Participant".into()))?;

            self.repository
                .kick_participant(KickRequest {
                    event_id: aggregate.event_id,
                    user_id,
                    status: transition(entry.status, ParticipantAction::Kick),
                })
                .await
                .map_err(ServiceError::from)
        };

        self.runner
            .run(
                "kick",
                action,
                Some(Box::pin(self.refresh())),
                Some("Participant removed".into()),
            )
            .await
    }

    /// Switch the active playlist; playback restarts from no active song.
    pub async fn change_playlist(&self, playlist_id: Option<String>) -> Result<(), ServiceError> {
        let action = async {
            let aggregate =
                self.require_role(ParticipantRole::can_manage_playlist, "change the playlist")?;
            let patch = EventPatch {
                event_id: aggregate.event_id,
                fields: MetadataPatch {
                    active_playlist_id: Some(playlist_id.clone()),
                    active_song_id: Some(None),
                    active_slide_position: Some(None),
                    ..MetadataPatch::default()
                },
            };
            self.repository
                .save_event(patch, Delivery::Standard)
                .await
                .map_err(ServiceError::from)
        };

        let refresh = async {
            self.refresh().await?;
            self.sync_catalog().await
        };
        self.runner
            .run(
                "playlist",
                action,
                Some(Box::pin(refresh)),
                Some("Playlist updated".into()),
            )
            .await
    }

    /// Fetch the songs of `playlist_id` and the slides of each song.
    pub async fn load_catalog(&self, playlist_id: &str) -> Result<SongCatalog, ServiceError> {
        let songs = self.repository.fetch_playlist_songs(playlist_id).await?;
        let song_ids = songs.iter().map(|song| song.id.clone()).collect();
        let slides = self.repository.fetch_song_slides(song_ids).await?;
        debug!(playlist_id, songs = songs.len(), slides = slides.len(), "catalog loaded");
        Ok(SongCatalog::new(playlist_id.to_string(), songs, slides))
    }

    /// Make the published catalog match the active playlist of the stored aggregate.
    pub async fn sync_catalog(&self) -> Result<(), ServiceError> {
        let wanted = self
            .store
            .get()
            .and_then(|aggregate| aggregate.metadata.active_playlist_id.clone())
            .filter(|id| !id.is_empty());
        let loaded = self
            .catalog()
            .map(|catalog| catalog.playlist_id.clone());
        if wanted == loaded {
            return Ok(());
        }

        match wanted {
            Some(playlist_id) => {
                let catalog = self.load_catalog(&playlist_id).await?;
                self.catalog.send_replace(Some(Arc::new(catalog)));
            }
            None => {
                self.catalog.send_replace(None);
            }
        }
        Ok(())
    }

    /// Reload the catalog whenever the active playlist of the aggregate changes.
    pub fn watch_playlist(self: &Arc<Self>) -> JoinHandle<()> {
        let service = self.clone();
        let mut aggregates = self.store.subscribe();
        tokio::spawn(async move {
            let mut previous = active_playlist(&service.store.get());
            while aggregates.changed().await.is_ok() {
                let current = active_playlist(&aggregates.borrow_and_update());
                if current == previous {
                    continue;
                }
                previous = current;
                if let Err(err) = service.sync_catalog().await {
                    warn!(error = %err, "failed to load playlist catalog");
                }
            }
        })
    }
}

fn active_playlist(snapshot: &AggregateSnapshot) -> Option<String> {
    snapshot
        .as_ref()
        .and_then(|aggregate| aggregate.metadata.active_playlist_id.clone())
}

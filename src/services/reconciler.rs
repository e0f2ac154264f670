//! Change-feed subscriptions keeping the aggregate store in sync with the backend.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use futures::StreamExt;
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::{
    dao::{
        credentials::CredentialProvider,
        feed::{ChangeEvent, ChangeFeed, ChangeStream, FeedTable, RowFilter},
        repository::EventRepository,
    },
    services::feed_events::{FeedUpdate, decode, reduce},
    state::store::AggregateStore,
};

/// Health of the realtime subscriptions, reported next to the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum FeedStatus {
    /// No subscription mounted.
    Stopped,
    /// Resolving the credential and opening subscriptions.
    Connecting,
    /// All subscriptions are open.
    Live,
    /// Realtime updates are unavailable; the view shows the last fetched snapshot.
    Degraded(String),
}

/// Mounts change-feed subscriptions for the loaded event and folds their notifications
/// into the [`AggregateStore`].
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<ReconcilerInner>,
}

struct ReconcilerInner {
    store: Arc<AggregateStore>,
    feed: Arc<dyn ChangeFeed>,
    credentials: Arc<dyn CredentialProvider>,
    repository: Arc<dyn EventRepository>,
    generation: AtomicU64,
    status: watch::Sender<FeedStatus>,
}

impl Reconciler {
    /// Wire the reconciler to its collaborators.
    pub fn new(
        store: Arc<AggregateStore>,
        feed: Arc<dyn ChangeFeed>,
        credentials: Arc<dyn CredentialProvider>,
        repository: Arc<dyn EventRepository>,
    ) -> Self {
        let (status, _rx) = watch::channel(FeedStatus::Stopped);
        Self {
            inner: Arc::new(ReconcilerInner {
                store,
                feed,
                credentials,
                repository,
                generation: AtomicU64::new(0),
                status,
            }),
        }
    }

    /// Current subscription health.
    pub fn status(&self) -> FeedStatus {
        self.inner.status.borrow().clone()
    }

    /// Observe subscription health changes.
    pub fn status_watcher(&self) -> watch::Receiver<FeedStatus> {
        self.inner.status.subscribe()
    }

    /// Start following `event_id`.
    ///
    /// Returns immediately; credential resolution and subscription setup continue in the
    /// background. Mounting again invalidates the previous mount.
    pub fn mount(&self, event_id: Uuid) -> Subscription {
        let mut generation = 0;
        self.inner.store.fenced(|| {
            generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        });

        let context = MountContext {
            reconciler: self.clone(),
            event_id,
            generation,
            tasks: Arc::new(TaskSet::default()),
        };
        self.inner.status.send_replace(FeedStatus::Connecting);
        info!(%event_id, generation, "mounting change-feed subscriptions");
        context.spawn(context.clone().setup());

        Subscription { context }
    }
}

/// Handle of a mounted set of subscriptions. Dropping it tears them down.
pub struct Subscription {
    context: MountContext,
}

impl Subscription {
    /// Generation assigned to this mount.
    pub fn generation(&self) -> u64 {
        self.context.generation
    }

    /// Whether notifications from this mount are still applied.
    pub fn is_active(&self) -> bool {
        self.context.is_current()
    }

    /// Stop applying notifications and close every subscription. Idempotent.
    ///
    /// Once this returns no notification from this mount can mutate the store, even when
    /// setup is still in flight.
    pub fn teardown(&self) {
        let inner = &self.context.reconciler.inner;
        let generation = self.context.generation;
        let mut invalidated = false;
        inner.store.fenced(|| {
            invalidated = inner
                .generation
                .compare_exchange(
                    generation,
                    generation + 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok();
        });
        self.context.tasks.close();

        if invalidated {
            inner.status.send_replace(FeedStatus::Stopped);
            info!(event_id = %self.context.event_id, generation, "change-feed subscriptions torn down");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Background tasks owned by one mount.
#[derive(Default)]
struct TaskSet {
    state: Mutex<TaskSetState>,
}

#[derive(Default)]
struct TaskSetState {
    closed: bool,
    handles: Vec<JoinHandle<()>>,
}

impl TaskSet {
    fn adopt(&self, handle: JoinHandle<()>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            handle.abort();
            return;
        }
        state.handles.retain(|existing| !existing.is_finished());
        state.handles.push(handle);
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        for handle in state.handles.drain(..) {
            handle.abort();
        }
    }
}

#[derive(Clone)]
struct MountContext {
    reconciler: Reconciler,
    event_id: Uuid,
    generation: u64,
    tasks: Arc<TaskSet>,
}

impl MountContext {
    fn inner(&self) -> &ReconcilerInner {
        &self.reconciler.inner
    }

    fn is_current(&self) -> bool {
        self.inner().generation.load(Ordering::SeqCst) == self.generation
    }

    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.adopt(tokio::spawn(future));
    }

    fn degrade(&self, reason: String) {
        if self.is_current() {
            warn!(event_id = %self.event_id, %reason, "realtime sync degraded; serving last fetched snapshot");
            self.inner().status.send_replace(FeedStatus::Degraded(reason));
        }
    }

    async fn setup(self) {
        let token = match self.inner().credentials.token().await {
            Ok(token) => token,
            Err(err) => {
                self.degrade(format!("credential unavailable: {err}"));
                return;
            }
        };
        if !self.is_current() {
            debug!(generation = self.generation, "mount superseded during credential resolution");
            return;
        }

        let subscriptions = [
            (FeedTable::Events, RowFilter::eq("id", self.event_id)),
            (
                FeedTable::EventParticipants,
                RowFilter::eq("event_id", self.event_id),
            ),
        ];
        for (table, filter) in subscriptions {
            let stream = match self
                .inner()
                .feed
                .subscribe(token.clone(), table, filter)
                .await
            {
                Ok(stream) => stream,
                Err(err) => {
                    self.degrade(format!("failed to subscribe to `{table}`: {err}"));
                    return;
                }
            };
            if !self.is_current() {
                return;
            }
            self.spawn(self.clone().consume(table, stream));
        }

        self.spawn(self.clone().follow_profiles(token));
        if self.is_current() {
            self.inner().status.send_replace(FeedStatus::Live);
            info!(event_id = %self.event_id, "change-feed subscriptions live");
        }
    }

    async fn consume(self, table: FeedTable, mut stream: ChangeStream) {
        while let Some(event) = stream.next().await {
            if !self.is_current() {
                return;
            }
            self.apply(table, &event);
        }
        self.degrade(format!("`{table}` feed closed"));
    }

    /// Follow profile changes of the owner and every participant, re-subscribing whenever
    /// that set of users changes.
    async fn follow_profiles(self, token: String) {
        let mut aggregates = self.inner().store.subscribe();

        loop {
            let Some(ids) = self.relevant_user_ids() else {
                return;
            };
            let filter = RowFilter::any_of("id", &ids);
            let mut stream = match self
                .inner()
                .feed
                .subscribe(token.clone(), FeedTable::Profiles, filter)
                .await
            {
                Ok(stream) => stream,
                Err(err) => {
                    self.degrade(format!("failed to subscribe to `profiles`: {err}"));
                    return;
                }
            };
            debug!(count = ids.len(), "following profile changes");

            loop {
                tokio::select! {
                    next = stream.next() => match next {
                        Some(event) => {
                            if !self.is_current() {
                                return;
                            }
                            self.apply(FeedTable::Profiles, &event);
                        }
                        None => {
                            self.degrade("`profiles` feed closed".into());
                            return;
                        }
                    },
                    changed = aggregates.changed() => {
                        if changed.is_err() || !self.is_current() {
                            return;
                        }
                        if self.relevant_user_ids().as_ref() != Some(&ids) {
                            break;
                        }
                    }
                }
            }
        }
    }

    fn relevant_user_ids(&self) -> Option<Vec<Uuid>> {
        self.inner()
            .store
            .get()
            .filter(|aggregate| aggregate.event_id == self.event_id)
            .map(|aggregate| aggregate.relevant_user_ids())
    }

    fn apply(&self, table: FeedTable, event: &ChangeEvent) {
        match decode(table, event, self.event_id) {
            Ok(Some(update)) => {
                if self.apply_update(&update) {
                    self.hydrate_if_needed(&update);
                }
            }
            Ok(None) => trace!(%table, kind = ?event.kind, "ignoring notification"),
            Err(err) => warn!(%table, error = %err, "dropping undecodable notification"),
        }
    }

    fn apply_update(&self, update: &FeedUpdate) -> bool {
        let changed = self.inner().store.update(|aggregate| {
            if !self.is_current() || aggregate.event_id != self.event_id {
                return None;
            }
            reduce(aggregate, update)
        });
        if changed {
            trace!(?update, "applied feed update");
        }
        changed
    }

    /// Fill in a fetched display name unless a profile notification already set one.
    fn apply_hydrated(&self, user_id: Uuid, username: Option<String>) -> bool {
        let update = FeedUpdate::ProfileRenamed { user_id, username };
        self.inner().store.update(|aggregate| {
            if !self.is_current() || aggregate.event_id != self.event_id {
                return None;
            }
            let unnamed = aggregate
                .participants
                .get(&user_id)
                .is_some_and(|entry| entry.username.is_none());
            if !unnamed {
                return None;
            }
            reduce(aggregate, &update)
        })
    }

    /// Fetch the display name of a participant that arrived without one.
    fn hydrate_if_needed(&self, update: &FeedUpdate) {
        let user_id = match update {
            FeedUpdate::ParticipantInserted(entry) => entry.user_id,
            FeedUpdate::ParticipantUpdated { user_id, .. } => *user_id,
            _ => return,
        };
        let missing = self.inner().store.get().is_some_and(|aggregate| {
            aggregate
                .participants
                .get(&user_id)
                .is_some_and(|entry| entry.username.is_none())
        });
        if !missing {
            return;
        }

        let context = self.clone();
        self.spawn(async move {
            match context.inner().repository.fetch_profiles(vec![user_id]).await {
                Ok(profiles) => {
                    if let Some(profile) = profiles.into_iter().find(|p| p.id == user_id) {
                        context.apply_hydrated(user_id, profile.username);
                    }
                }
                Err(err) => warn!(%user_id, error = %err, "failed to hydrate participant username"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::BoxFuture;
    use serde_json::json;
    use tokio::time::sleep;

    use super::*;
    use crate::{
        dao::{
            credentials::StaticCredentials,
            feed::LocalChangeFeed,
            memory::{MemoryFixture, MemoryRepository},
            models::{EventPatch, InviteRequest, KickRequest, ProfileRow, Row, SlideRow, SongRow},
            repository::Delivery,
            storage::StorageResult,
        },
        state::aggregate::{EventAggregate, EventMetadata},
    };

    const EVENT: Uuid = Uuid::from_u128(100);
    const OWNER: Uuid = Uuid::from_u128(1);
    const USER: Uuid = Uuid::from_u128(2);

    /// Credential provider that resolves after a delay.
    struct SlowCredentials(Duration);

    impl CredentialProvider for SlowCredentials {
        fn token(&self) -> BoxFuture<'static, StorageResult<String>> {
            let delay = self.0;
            Box::pin(async move {
                sleep(delay).await;
                Ok("token".to_string())
            })
        }
    }

    /// Repository whose profile lookups answer late with the seeded names.
    struct SlowProfiles {
        inner: MemoryRepository,
        delay: Duration,
    }

    impl EventRepository for SlowProfiles {
        fn fetch_event_by_slug(&self, slug: &str) -> BoxFuture<'static, StorageResult<Option<Row>>> {
            self.inner.fetch_event_by_slug(slug)
        }

        fn fetch_participants(&self, event_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<Row>>> {
            self.inner.fetch_participants(event_id)
        }

        fn fetch_profiles(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<Vec<ProfileRow>>> {
            let delay = self.delay;
            let lookup = self.inner.fetch_profiles(ids);
            Box::pin(async move {
                sleep(delay).await;
                lookup.await
            })
        }

        fn fetch_playlist_songs(
            &self,
            playlist_id: &str,
        ) -> BoxFuture<'static, StorageResult<Vec<SongRow>>> {
            self.inner.fetch_playlist_songs(playlist_id)
        }

        fn fetch_song_slides(
            &self,
            song_ids: Vec<String>,
        ) -> BoxFuture<'static, StorageResult<Vec<SlideRow>>> {
            self.inner.fetch_song_slides(song_ids)
        }

        fn save_event(
            &self,
            patch: EventPatch,
            delivery: Delivery,
        ) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.save_event(patch, delivery)
        }

        fn invite_participant(&self, request: InviteRequest) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.invite_participant(request)
        }

        fn kick_participant(&self, request: KickRequest) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.kick_participant(request)
        }
    }

    struct Harness {
        store: Arc<AggregateStore>,
        feed: Arc<LocalChangeFeed>,
        repository: MemoryRepository,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(AggregateStore::new());
            store.load(EventAggregate::new(EVENT, OWNER, EventMetadata::default(), []));
            let feed = Arc::new(LocalChangeFeed::new(64));
            let repository = MemoryRepository::new(MemoryFixture {
                profiles: vec![ProfileRow {
                    id: USER,
                    username: Some("dana".into()),
                }],
                ..MemoryFixture::default()
            });
            Self {
                store,
                feed,
                repository,
            }
        }

        fn reconciler(&self, credentials: Arc<dyn CredentialProvider>) -> Reconciler {
            Reconciler::new(
                self.store.clone(),
                self.feed.clone(),
                credentials,
                Arc::new(self.repository.clone()),
            )
        }

        fn publish_notes(&self, notes: &str) {
            let row = json!({ "id": EVENT.to_string(), "notes": notes });
            self.feed.publish(
                FeedTable::Events,
                ChangeEvent::update(row.as_object().cloned().unwrap(), None),
            );
        }
    }

    fn roster_row(user: Uuid) -> Row {
        json!({
            "event_id": EVENT.to_string(),
            "user_id": user.to_string(),
            "role": "participant",
            "status": "joined",
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn applies_notifications_once_live() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(Arc::new(StaticCredentials::new(Some("t".into()))));
        let _subscription = reconciler.mount(EVENT);
        settle().await;
        assert_eq!(reconciler.status(), FeedStatus::Live);

        harness.publish_notes("tuned to 440");
        harness.feed.publish(
            FeedTable::EventParticipants,
            ChangeEvent::insert(roster_row(USER)),
        );
        settle().await;

        let aggregate = harness.store.get().unwrap();
        assert_eq!(aggregate.metadata.notes.as_deref(), Some("tuned to 440"));
        assert_eq!(
            aggregate.participants[&USER].username.as_deref(),
            Some("dana")
        );
    }

    #[tokio::test]
    async fn teardown_before_setup_completes_blocks_mutation() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(Arc::new(SlowCredentials(Duration::from_millis(50))));
        let subscription = reconciler.mount(EVENT);
        subscription.teardown();
        subscription.teardown();
        assert!(!subscription.is_active());

        sleep(Duration::from_millis(100)).await;
        harness.publish_notes("late");
        settle().await;

        assert_eq!(harness.feed.subscriber_count(FeedTable::Events), 0);
        assert_eq!(harness.store.get().unwrap().metadata.notes, None);
        assert_eq!(reconciler.status(), FeedStatus::Stopped);
    }

    #[tokio::test]
    async fn teardown_right_after_setup_resolves_blocks_mutation() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(Arc::new(StaticCredentials::new(Some("t".into()))));
        let subscription = reconciler.mount(EVENT);
        settle().await;
        assert!(harness.feed.subscriber_count(FeedTable::Events) > 0);

        subscription.teardown();
        harness.publish_notes("after unmount");
        settle().await;

        assert_eq!(harness.store.get().unwrap().metadata.notes, None);
    }

    #[tokio::test]
    async fn remount_supersedes_previous_mount() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(Arc::new(StaticCredentials::new(Some("t".into()))));
        let first = reconciler.mount(EVENT);
        let second = reconciler.mount(EVENT);
        assert!(!first.is_active());
        assert!(second.is_active());

        drop(first);
        assert!(second.is_active());
        settle().await;

        harness.publish_notes("once");
        settle().await;
        assert_eq!(
            harness.store.get().unwrap().metadata.notes.as_deref(),
            Some("once")
        );
    }

    #[tokio::test]
    async fn credential_failure_degrades_without_mutating() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(Arc::new(StaticCredentials::new(None)));
        let _subscription = reconciler.mount(EVENT);
        settle().await;

        assert!(matches!(reconciler.status(), FeedStatus::Degraded(_)));
        assert_eq!(harness.feed.subscriber_count(FeedTable::Events), 0);
        assert!(harness.store.get().is_some());
    }

    #[tokio::test]
    async fn profile_subscription_follows_new_participants() {
        let harness = Harness::new();
        let reconciler = harness.reconciler(Arc::new(StaticCredentials::new(Some("t".into()))));
        let _subscription = reconciler.mount(EVENT);
        settle().await;

        harness.feed.publish(
            FeedTable::EventParticipants,
            ChangeEvent::insert(roster_row(USER)),
        );
        settle().await;

        let rename = json!({ "id": USER.to_string(), "username": "dana-k" });
        harness.feed.publish(
            FeedTable::Profiles,
            ChangeEvent::update(rename.as_object().cloned().unwrap(), None),
        );
        settle().await;

        assert_eq!(
            harness.store.get().unwrap().participants[&USER]
                .username
                .as_deref(),
            Some("dana-k")
        );
    }

    #[tokio::test]
    async fn late_profile_fetch_does_not_override_newer_rename() {
        let harness = Harness::new();
        let repository = SlowProfiles {
            inner: harness.repository.clone(),
            delay: Duration::from_millis(60),
        };
        let reconciler = Reconciler::new(
            harness.store.clone(),
            harness.feed.clone(),
            Arc::new(StaticCredentials::new(Some("t".into()))),
            Arc::new(repository),
        );
        let _subscription = reconciler.mount(EVENT);
        settle().await;

        harness.feed.publish(
            FeedTable::EventParticipants,
            ChangeEvent::insert(roster_row(USER)),
        );
        settle().await;
        assert_eq!(harness.store.get().unwrap().participants[&USER].username, None);

        let rename = json!({ "id": USER.to_string(), "username": "dana-k" });
        harness.feed.publish(
            FeedTable::Profiles,
            ChangeEvent::update(rename.as_object().cloned().unwrap(), None),
        );
        settle().await;
        sleep(Duration::from_millis(100)).await;

        assert_eq!(
            harness.store.get().unwrap().participants[&USER]
                .username
                .as_deref(),
            Some("dana-k")
        );
    }
}

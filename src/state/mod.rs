pub mod action;
pub mod aggregate;
pub mod participant;
pub mod playback;
pub mod store;

use std::sync::{Arc, Mutex, PoisonError};

use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    dao::{credentials::CredentialProvider, feed::LocalChangeFeed, repository::EventRepository},
    dto::view::SyncSnapshot,
    error::ServiceError,
    services::{
        action_runner::ActionRunner,
        autosave::AutosaveController,
        event_service::EventService,
        reconciler::{FeedStatus, Reconciler, Subscription},
        view::{self, EventView},
    },
    state::{
        action::{ActionState, ActionStateCell, LoadState},
        aggregate::EventAggregate,
        playback::PlaybackSelection,
        store::{AggregateSnapshot, AggregateStore},
    },
};

/// Application state shared between handlers and background tasks.
pub type SharedState = Arc<AppState>;

/// Central application state wiring the store to the services that read and write it.
pub struct AppState {
    config: AppConfig,
    store: Arc<AggregateStore>,
    actions: Arc<ActionStateCell>,
    feed: Arc<LocalChangeFeed>,
    events: Arc<EventService>,
    autosave: AutosaveController,
    reconciler: Reconciler,
    subscription: Mutex<Option<Subscription>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The reconciler subscribes to `feed`, which also receives webhook notifications.
    pub fn new(
        config: AppConfig,
        repository: Arc<dyn EventRepository>,
        feed: Arc<LocalChangeFeed>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> SharedState {
        let store = Arc::new(AggregateStore::new());
        let actions = Arc::new(ActionStateCell::new());
        let events = Arc::new(EventService::new(
            repository.clone(),
            store.clone(),
            ActionRunner::new(actions.clone()),
            config.viewer_id,
        ));
        let autosave = AutosaveController::new(
            store.clone(),
            repository.clone(),
            actions.clone(),
            config.debounce,
        );
        let reconciler = Reconciler::new(store.clone(), feed.clone(), credentials, repository);

        Arc::new(Self {
            config,
            store,
            actions,
            feed,
            events,
            autosave,
            reconciler,
            subscription: Mutex::new(None),
            watchers: Mutex::new(Vec::new()),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Store holding the followed aggregate.
    pub fn store(&self) -> &Arc<AggregateStore> {
        &self.store
    }

    /// Shared action state.
    pub fn actions(&self) -> &ActionStateCell {
        &self.actions
    }

    /// In-process change feed fed by the webhook.
    pub fn feed(&self) -> &LocalChangeFeed {
        &self.feed
    }

    /// Loading and admin actions.
    pub fn events(&self) -> &EventService {
        &self.events
    }

    /// Playback autosave.
    pub fn autosave(&self) -> &AutosaveController {
        &self.autosave
    }

    /// Health of the realtime subscriptions.
    pub fn feed_status(&self) -> FeedStatus {
        self.reconciler.status()
    }

    /// Observe the health of the realtime subscriptions.
    pub fn feed_watcher(&self) -> watch::Receiver<FeedStatus> {
        self.reconciler.status_watcher()
    }

    /// Load `slug` and keep it synchronized until [`AppState::shutdown`] or the next call.
    pub async fn follow(&self, slug: &str) -> Result<Arc<EventAggregate>, ServiceError> {
        self.ensure_watchers();

        let previous = self.store.event_id();
        let aggregate = self.events.load_event(slug).await?;
        if previous.is_some_and(|id| id != aggregate.event_id) {
            self.autosave.reset();
        }

        let subscription = self.reconciler.mount(aggregate.event_id);
        // Dropping the previous handle tears its subscriptions down.
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(subscription);

        if let Err(err) = self.events.sync_catalog().await {
            warn!(error = %err, "failed to load playlist catalog");
        }
        info!(slug, event_id = %aggregate.event_id, "following event");
        Ok(aggregate)
    }

    fn ensure_watchers(&self) {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        if watchers.is_empty() {
            watchers.push(self.autosave.watch_aggregate());
            watchers.push(self.events.watch_playlist());
        }
    }

    /// Derived view for the configured viewer.
    pub fn view(&self) -> Result<EventView, ServiceError> {
        let aggregate = self.store.get().ok_or(ServiceError::Degraded)?;
        Ok(self.project(&aggregate))
    }

    fn project(&self, aggregate: &EventAggregate) -> EventView {
        let catalog = self.events.catalog();
        let selection = self.autosave.selection();
        view::compute(
            aggregate,
            self.events.viewer(),
            catalog.as_deref(),
            Some(&selection),
        )
    }

    /// View together with loading, action and subscription state.
    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            load: self.events.load_state(),
            feed: self.reconciler.status(),
            action: self.actions.get(),
            selection: self.autosave.selection(),
            view: self.store.get().map(|aggregate| self.project(&aggregate)),
        }
    }

    /// Receivers signalling any change that affects [`AppState::snapshot`].
    pub fn watchers(&self) -> SnapshotWatchers {
        SnapshotWatchers {
            aggregate: self.store.subscribe(),
            load: self.events.subscribe_load_state(),
            action: self.actions.subscribe(),
            selection: self.autosave.subscribe_selection(),
            catalog: self.events.subscribe_catalog(),
            feed: self.reconciler.status_watcher(),
        }
    }

    /// Whether clients currently see a stale or missing snapshot.
    pub fn is_degraded(&self) -> bool {
        self.events.load_state() != LoadState::Ready
            || !matches!(self.reconciler.status(), FeedStatus::Live)
    }

    /// Flush pending autosaves, then stop following the event.
    ///
    /// Returns the number of saves flushed.
    pub async fn shutdown(&self) -> usize {
        let flushed = self.autosave.flush().await;

        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.teardown();
        }
        for watcher in self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            watcher.abort();
        }

        info!(flushed, "synchronization stopped");
        flushed
    }
}

/// Change notifications for every input of a [`SyncSnapshot`].
pub struct SnapshotWatchers {
    /// Followed aggregate.
    pub aggregate: watch::Receiver<AggregateSnapshot>,
    /// Initial load progress.
    pub load: watch::Receiver<LoadState>,
    /// Discrete action progress.
    pub action: watch::Receiver<ActionState>,
    /// Local playback overrides.
    pub selection: watch::Receiver<PlaybackSelection>,
    /// Song catalog of the active playlist.
    pub catalog: watch::Receiver<Option<Arc<view::SongCatalog>>>,
    /// Realtime subscription health.
    pub feed: watch::Receiver<FeedStatus>,
}

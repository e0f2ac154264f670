//! Debounced persistence of the local playback selection.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::EventPatch,
        repository::{Delivery, EventRepository},
    },
    error::ServiceError,
    state::{
        action::ActionStateCell, aggregate::MetadataPatch, playback::PlaybackSelection,
        store::AggregateStore,
    },
};

/// Debounce window applied when the configuration does not override it.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(400);

type SendFn<T> = Arc<dyn Fn(T, Delivery) -> BoxFuture<'static, ()> + Send + Sync>;

/// Coalesces rapid triggers into a single delayed send.
///
/// Only the last value triggered within the window is sent. [`Debouncer::flush`] sends the
/// pending value right away. Sends never overlap: a send waits for the previous one, and a
/// queued send that was superseded by a newer trigger is skipped.
pub struct Debouncer<T> {
    inner: Arc<DebouncerInner<T>>,
}

impl<T> Clone for Debouncer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct DebouncerInner<T> {
    name: &'static str,
    window: Duration,
    slot: Mutex<Slot<T>>,
    in_flight: tokio::sync::Mutex<()>,
    send: SendFn<T>,
}

struct Slot<T> {
    pending: Option<T>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

impl<T> DebouncerInner<T> {
    fn slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Debouncer<T>
where
    T: Send + 'static,
{
    /// Create a debouncer named `name` (used in logs) calling `send` after `window`.
    pub fn new<F>(name: &'static str, window: Duration, send: F) -> Self
    where
        F: Fn(T, Delivery) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(DebouncerInner {
                name,
                window,
                slot: Mutex::new(Slot {
                    pending: None,
                    timer: None,
                    generation: 0,
                }),
                in_flight: tokio::sync::Mutex::new(()),
                send: Arc::new(send),
            }),
        }
    }

    /// Replace the pending value and restart the timer.
    pub fn trigger(&self, value: T) {
        let mut slot = self.inner.slot();
        slot.generation += 1;
        slot.pending = Some(value);
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }

        let generation = slot.generation;
        let inner = self.inner.clone();
        slot.timer = Some(tokio::spawn(async move {
            sleep(inner.window).await;
            let value = {
                let mut slot = inner.slot();
                if slot.generation != generation {
                    return;
                }
                slot.timer = None;
                slot.pending.take()
            };
            if let Some(value) = value {
                dispatch(&inner, value, generation, Delivery::Standard).await;
            }
        }));
    }

    /// Whether a value is waiting for its timer.
    pub fn is_pending(&self) -> bool {
        self.inner.slot().pending.is_some()
    }

    /// Cancel the timer and send the pending value now with keep-alive delivery.
    ///
    /// Returns whether a value was sent.
    pub async fn flush(&self) -> bool {
        let (value, generation) = {
            let mut slot = self.inner.slot();
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            (slot.pending.take(), slot.generation)
        };
        match value {
            Some(value) => {
                dispatch(&self.inner, value, generation, Delivery::KeepAlive).await;
                true
            }
            None => false,
        }
    }

    /// Drop the pending value without sending it.
    pub fn cancel(&self) {
        let mut slot = self.inner.slot();
        slot.generation += 1;
        slot.pending = None;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
    }
}

async fn dispatch<T>(inner: &DebouncerInner<T>, value: T, generation: u64, delivery: Delivery) {
    let _in_flight = inner.in_flight.lock().await;
    if delivery == Delivery::Standard && inner.slot().generation != generation {
        debug!(field = inner.name, "skipping superseded save");
        return;
    }
    (inner.send)(value, delivery).await;
}

/// Autosaves the active song and slide of the loaded event.
///
/// Each field has its own [`Debouncer`]; the local [`PlaybackSelection`] is updated
/// synchronously so readers see the new position before it is persisted.
pub struct AutosaveController {
    store: Arc<AggregateStore>,
    selection: Arc<watch::Sender<PlaybackSelection>>,
    song: Debouncer<Option<String>>,
    slide: Debouncer<Option<u32>>,
}

impl AutosaveController {
    /// Wire the controller to the store and the repository it saves through.
    pub fn new(
        store: Arc<AggregateStore>,
        repository: Arc<dyn EventRepository>,
        actions: Arc<ActionStateCell>,
        window: Duration,
    ) -> Self {
        let (selection, _rx) = watch::channel(PlaybackSelection::default());
        let saver = FieldSaver {
            store: store.clone(),
            repository,
            actions,
        };

        let song_saver = saver.clone();
        let song = Debouncer::new(
            "active_song_id",
            window,
            move |song_id: Option<String>, delivery| {
                song_saver.save(
                    MetadataPatch {
                        active_song_id: Some(song_id),
                        ..MetadataPatch::default()
                    },
                    delivery,
                )
            },
        );
        let slide = Debouncer::new(
            "active_slide_position",
            window,
            move |position: Option<u32>, delivery| {
                saver.save(
                    MetadataPatch {
                        active_slide_position: Some(position),
                        ..MetadataPatch::default()
                    },
                    delivery,
                )
            },
        );

        Self {
            store,
            selection: Arc::new(selection),
            song,
            slide,
        }
    }

    /// Current local selection.
    pub fn selection(&self) -> PlaybackSelection {
        self.selection.borrow().clone()
    }

    /// Observe local selection changes.
    pub fn subscribe_selection(&self) -> watch::Receiver<PlaybackSelection> {
        self.selection.subscribe()
    }

    /// Select a song. Moving to a different song restarts it at the first slide unless a
    /// slide save is already pending.
    pub fn set_song(&self, song_id: Option<String>) {
        let current = self
            .store
            .get()
            .and_then(|aggregate| {
                self.selection
                    .borrow()
                    .effective_song(&aggregate.metadata)
                    .map(str::to_string)
            });
        let switched = song_id.is_some() && song_id != current;

        self.selection
            .send_modify(|selection| selection.song_id = song_id.clone());
        self.song.trigger(song_id);

        if switched && !self.slide.is_pending() {
            self.set_slide(Some(0));
        }
    }

    /// Select a slide position.
    pub fn set_slide(&self, position: Option<u32>) {
        self.selection
            .send_modify(|selection| selection.slide_position = position);
        self.slide.trigger(position);
    }

    /// Send every pending save now. Returns the number of requests sent.
    pub async fn flush(&self) -> usize {
        let (song, slide) = tokio::join!(self.song.flush(), self.slide.flush());
        let sent = usize::from(song) + usize::from(slide);
        if sent > 0 {
            info!(sent, "flushed pending autosaves");
        }
        sent
    }

    /// Drop pending saves and local overrides, e.g. when the event is unloaded.
    pub fn reset(&self) {
        self.song.cancel();
        self.slide.cancel();
        self.selection.send_replace(PlaybackSelection::default());
    }

    /// Follow aggregate changes and drop local overrides once the authoritative fields move
    /// elsewhere.
    pub fn watch_aggregate(&self) -> JoinHandle<()> {
        let mut aggregates = self.store.subscribe();
        let selection = self.selection.clone();
        let mut previous = self.store.get();

        tokio::spawn(async move {
            while aggregates.changed().await.is_ok() {
                let current = aggregates.borrow_and_update().clone();
                match (&previous, &current) {
                    (Some(before), Some(after)) if before.event_id == after.event_id => {
                        selection.send_if_modified(|selection| {
                            selection.reconcile(&before.metadata, &after.metadata)
                        });
                    }
                    _ => {
                        selection.send_if_modified(|selection| {
                            let reset = *selection != PlaybackSelection::default();
                            *selection = PlaybackSelection::default();
                            reset
                        });
                    }
                }
                previous = current;
            }
        })
    }
}

#[derive(Clone)]
struct FieldSaver {
    store: Arc<AggregateStore>,
    repository: Arc<dyn EventRepository>,
    actions: Arc<ActionStateCell>,
}

impl FieldSaver {
    fn save(&self, fields: MetadataPatch, delivery: Delivery) -> BoxFuture<'static, ()> {
        let saver = self.clone();
        Box::pin(async move {
            let Some(event_id) = saver.store.event_id() else {
                saver
                    .actions
                    .report_error(ServiceError::Degraded.user_message());
                return;
            };

            let patch = EventPatch {
                event_id,
                fields: fields.clone(),
            };
            match saver.repository.save_event(patch, delivery).await {
                Ok(()) => {
                    debug!(%event_id, ?delivery, "autosave stored");
                    if saver.store.event_id() == Some(event_id) {
                        saver.store.set_metadata(&fields);
                    }
                }
                Err(err) => {
                    let err = ServiceError::from(err);
                    warn!(%event_id, error = %err, "autosave failed");
                    saver.actions.report_error(err.user_message());
                }
            }
        })
    }
}

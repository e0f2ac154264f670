//! Payloads describing the synchronized state of the followed event.

use serde::Serialize;

use crate::{
    services::{reconciler::FeedStatus, view::EventView},
    state::{
        action::{ActionState, LoadState},
        playback::PlaybackSelection,
    },
};

/// Everything a client renders: the derived view plus the side-channel states around it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSnapshot {
    /// Loading state of the aggregate; a failure here replaces the view.
    pub load: LoadState,
    /// State of the realtime subscriptions.
    pub feed: FeedStatus,
    /// Progress and outcome of the last discrete action or autosave.
    pub action: ActionState,
    /// Local playback overrides not yet confirmed by the backend.
    pub selection: PlaybackSelection,
    /// Derived view, absent while no event is loaded.
    pub view: Option<EventView>,
}

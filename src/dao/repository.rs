use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{EventPatch, InviteRequest, KickRequest, ProfileRow, Row, SlideRow, SongRow},
    storage::StorageResult,
};

/// How a save request should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Regular request tied to the caller.
    Standard,
    /// Request that must complete even while the caller is shutting down.
    KeepAlive,
}

/// Queries and commands the synchronization engine needs from the backend.
pub trait EventRepository: Send + Sync {
    /// Event row for `slug`, or `None` when no visible event has that slug.
    fn fetch_event_by_slug(&self, slug: &str) -> BoxFuture<'static, StorageResult<Option<Row>>>;
    /// Raw roster rows of an event; rows are validated by the caller.
    fn fetch_participants(&self, event_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<Row>>>;
    /// Profiles of the given users.
    fn fetch_profiles(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<Vec<ProfileRow>>>;
    /// Songs of a playlist.
    fn fetch_playlist_songs(
        &self,
        playlist_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<SongRow>>>;
    /// Slides of the given songs.
    fn fetch_song_slides(
        &self,
        song_ids: Vec<String>,
    ) -> BoxFuture<'static, StorageResult<Vec<SlideRow>>>;
    /// Persist a partial metadata update.
    fn save_event(
        &self,
        patch: EventPatch,
        delivery: Delivery,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Add or re-invite a participant.
    fn invite_participant(&self, request: InviteRequest) -> BoxFuture<'static, StorageResult<()>>;
    /// Mark a participant as kicked.
    fn kick_participant(&self, request: KickRequest) -> BoxFuture<'static, StorageResult<()>>;
}

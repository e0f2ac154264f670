/// Admin action requests.
pub mod admin;
/// Webhook ingest acknowledgements.
pub mod feed;
/// Health probe responses.
pub mod health;
/// Playback selection requests.
pub mod playback;
/// Shared validation helpers.
pub mod validation;
/// Snapshots pushed to view subscribers.
pub mod view;

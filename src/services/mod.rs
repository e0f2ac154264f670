/// Discrete actions with loading, error and success reporting.
pub mod action_runner;
/// Debounced autosave of the playback selection.
pub mod autosave;
/// Event loading, refresh and admin actions.
pub mod event_service;
/// Decoding and reduction of change notifications.
pub mod feed_events;
/// Change-feed subscriptions for the followed event.
pub mod reconciler;
/// Load retry and resubscription loop.
pub mod supervisor;
/// Derived per-viewer view of the aggregate.
pub mod view;
/// Server-Sent Events stream of view snapshots.
pub mod view_stream;

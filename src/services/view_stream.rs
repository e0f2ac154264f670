//! Server-sent stream of [`SyncSnapshot`]s.

use std::{convert::Infallible, time::Duration};

use async_stream::stream;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::{dto::view::SyncSnapshot, state::SharedState};

/// Snapshots of `state`: the current one first, then one per observable change.
///
/// Consecutive identical snapshots are collapsed. Dropping the stream unsubscribes.
pub fn snapshots(state: SharedState) -> impl Stream<Item = SyncSnapshot> {
    let mut watchers = state.watchers();
    stream! {
        let mut last = state.snapshot();
        yield last.clone();

        loop {
            let alive = tokio::select! {
                changed = watchers.aggregate.changed() => changed.is_ok(),
                changed = watchers.load.changed() => changed.is_ok(),
                changed = watchers.action.changed() => changed.is_ok(),
                changed = watchers.selection.changed() => changed.is_ok(),
                changed = watchers.catalog.changed() => changed.is_ok(),
                changed = watchers.feed.changed() => changed.is_ok(),
            };
            if !alive {
                break;
            }

            let next = state.snapshot();
            if next != last {
                last = next.clone();
                yield next;
            }
        }
    }
}

/// Convert the snapshot stream into an SSE response.
pub fn to_sse_stream(state: SharedState) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = snapshots(state).map(|snapshot| {
        let event = match Event::default().event("snapshot").json_data(&snapshot) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "failed to serialize view snapshot");
                Event::default().event("error").data("snapshot unavailable")
            }
        };
        Ok(event)
    });
    debug!("view SSE stream opened");

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

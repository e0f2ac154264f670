//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};
use stagesync::{
    config::AppConfig,
    dao::{
        credentials::StaticCredentials,
        feed::LocalChangeFeed,
        memory::{MemoryFixture, MemoryRepository},
        models::Row,
    },
    state::{AppState, SharedState},
};
use uuid::Uuid;

pub const EVENT: Uuid = Uuid::from_u128(0x100);
pub const OTHER_EVENT: Uuid = Uuid::from_u128(0x200);
pub const OWNER: Uuid = Uuid::from_u128(1);
pub const ADMIN: Uuid = Uuid::from_u128(2);
pub const GUEST: Uuid = Uuid::from_u128(3);
pub const DEBOUNCE: Duration = Duration::from_millis(40);

pub fn row(value: Value) -> Row {
    value.as_object().cloned().expect("fixture rows are objects")
}

pub fn fixture() -> MemoryFixture {
    serde_json::from_value(json!({
        "events": [{
            "id": EVENT.to_string(),
            "owner_id": OWNER.to_string(),
            "name": "Evening vigil",
            "slug": "evening-vigil",
            "active_playlist_id": "p1",
            "active_song_id": "s1",
            "active_slide_position": 0,
        }],
        "participants": [{
            "event_id": EVENT.to_string(),
            "user_id": ADMIN.to_string(),
            "role": "admin",
            "status": "joined",
        }],
        "profiles": [
            { "id": OWNER.to_string(), "username": "maestro" },
            { "id": ADMIN.to_string(), "username": "ari" },
        ],
        "playlist_songs": {
            "p1": [
                { "song_id": "s1", "title": "Opening", "position": 1 },
                { "song_id": "s2", "title": "Closing", "position": 2 },
            ],
        },
        "slides": [
            { "song_id": "s2", "position": 0 },
            { "song_id": "s2", "position": 1 },
        ],
    }))
    .expect("fixture matches MemoryFixture")
}

pub struct Setup {
    pub state: SharedState,
    pub repository: MemoryRepository,
    pub feed: Arc<LocalChangeFeed>,
}

pub fn setup(viewer: Uuid) -> Setup {
    let feed = Arc::new(LocalChangeFeed::new(64));
    let repository = MemoryRepository::new(fixture()).with_feed(feed.clone());
    let state = AppState::new(
        AppConfig {
            event_slug: Some("evening-vigil".into()),
            viewer_id: Some(viewer),
            debounce: DEBOUNCE,
            ..AppConfig::default()
        },
        Arc::new(repository.clone()),
        feed.clone(),
        Arc::new(StaticCredentials::new(Some("token".into()))),
    );
    Setup {
        state,
        repository,
        feed,
    }
}

/// Poll `check` until it holds or two seconds elapse.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

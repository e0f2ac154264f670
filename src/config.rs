//! Application-level configuration loading: which event to follow, as whom, and how.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::autosave::DEFAULT_DEBOUNCE;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/stagesync.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "STAGESYNC_CONFIG_PATH";
/// Capacity of each per-table channel of the in-process change feed.
const DEFAULT_FEED_CAPACITY: usize = 256;

/// Where rows are read from and saves are sent to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-memory tables seeded from a JSON fixture (empty when no path is given).
    Memory {
        #[serde(default)]
        fixture: Option<PathBuf>,
    },
    /// Remote PostgREST-style API configured through environment variables.
    Rest,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory { fixture: None }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Slug of the event loaded at startup.
    pub event_slug: Option<String>,
    /// User the host acts as for permissions and admin actions.
    pub viewer_id: Option<Uuid>,
    /// Debounce window of the playback autosave.
    pub debounce: Duration,
    /// Buffered notifications per table before slow subscribers lag.
    pub feed_capacity: usize,
    /// Backend selection.
    pub backend: BackendConfig,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        slug = app_config.event_slug.as_deref().unwrap_or("<none>"),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            event_slug: None,
            viewer_id: None,
            debounce: DEFAULT_DEBOUNCE,
            feed_capacity: DEFAULT_FEED_CAPACITY,
            backend: BackendConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    event_slug: Option<String>,
    #[serde(default)]
    viewer_id: Option<Uuid>,
    #[serde(default)]
    debounce_ms: Option<u64>,
    #[serde(default)]
    feed_capacity: Option<usize>,
    #[serde(default)]
    backend: BackendConfig,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            event_slug: value.event_slug.filter(|slug| !slug.is_empty()),
            viewer_id: value.viewer_id,
            debounce: value
                .debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DEBOUNCE),
            feed_capacity: value
                .feed_capacity
                .filter(|capacity| *capacity > 0)
                .unwrap_or(DEFAULT_FEED_CAPACITY),
            backend: value.backend,
        }
    }
}

fn resolve_config_path() -> PathBuf {
    env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_applies_defaults() {
        let raw: RawConfig = serde_json::from_str(r#"{ "event_slug": "vigil" }"#).unwrap();
        let config = AppConfig::from(raw);

        assert_eq!(config.event_slug.as_deref(), Some("vigil"));
        assert_eq!(config.debounce, DEFAULT_DEBOUNCE);
        assert_eq!(config.feed_capacity, DEFAULT_FEED_CAPACITY);
        assert_eq!(config.backend, BackendConfig::Memory { fixture: None });
    }

    #[test]
    fn raw_config_reads_backend_and_timing() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "viewer_id": "00000000-0000-0000-0000-000000000001",
                "debounce_ms": 150,
                "feed_capacity": 0,
                "backend": { "kind": "rest" }
            }"#,
        )
        .unwrap();
        let config = AppConfig::from(raw);

        assert_eq!(config.viewer_id, Some(Uuid::from_u128(1)));
        assert_eq!(config.debounce, Duration::from_millis(150));
        assert_eq!(config.feed_capacity, DEFAULT_FEED_CAPACITY);
        assert_eq!(config.backend, BackendConfig::Rest);
    }
}

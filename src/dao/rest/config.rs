use std::time::Duration;

use super::error::{RestError, RestResult};

/// Default bound on regular requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime configuration describing how to reach the REST backend.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Root URL of the API, without a trailing slash.
    pub base_url: String,
    /// Project key sent in the `apikey` header.
    pub api_key: String,
    /// Timeout applied to regular requests.
    pub request_timeout: Duration,
}

impl RestConfig {
    /// Construct a configuration from an explicit base URL and public API key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build a configuration by reading the expected environment variables.
    pub fn from_env() -> RestResult<Self> {
        let base_url = std::env::var("STAGESYNC_API_URL").map_err(|_| RestError::MissingEnvVar {
            var: "STAGESYNC_API_URL",
        })?;
        let api_key = std::env::var("STAGESYNC_API_KEY").map_err(|_| RestError::MissingEnvVar {
            var: "STAGESYNC_API_KEY",
        })?;

        let config = Self::new(base_url, api_key);
        match std::env::var("STAGESYNC_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            Some(millis) => Ok(config.with_request_timeout(Duration::from_millis(millis))),
            None => Ok(config),
        }
    }
}

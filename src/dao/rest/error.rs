//! Error types raised by the REST storage implementation.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::storage::StorageError;

/// Convenient result alias returning [`RestError`] failures.
pub type RestResult<T> = Result<T, RestError>;

/// Failures that can occur while talking to the REST backend.
#[derive(Debug, Error)]
pub enum RestError {
    /// Required environment variable is missing.
    #[error("missing REST backend environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build REST client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent or timed out.
    #[error("failed to send request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The backend returned an unexpected status code.
    #[error("unexpected response status {status} for `{path}`")]
    RequestStatus { path: String, status: StatusCode },
    /// Response payload could not be parsed.
    #[error("failed to decode response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
}

impl From<RestError> for StorageError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::RequestStatus { path, status } => StorageError::Rejected {
                path,
                status: status.as_u16(),
            },
            RestError::DecodeResponse { path, source } => StorageError::decode(path, source),
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}

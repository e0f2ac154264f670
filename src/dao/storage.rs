use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by backends regardless of the underlying transport.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The backend answered with a non-success status.
    #[error("storage rejected request to `{path}` with status {status}")]
    Rejected { path: String, status: u16 },
    /// The backend answered with a payload that could not be decoded.
    #[error("failed to decode response from `{path}`")]
    Decode {
        path: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// No credential could be obtained for the request.
    #[error("credential unavailable: {0}")]
    Credential(String),
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a decode error from any deserialization failure.
    pub fn decode(path: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Decode {
            path: path.into(),
            source: Box::new(source),
        }
    }
}

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;

/// Errors raised by the synchronization services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The event (or another requested record) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The viewer lacks the role required for the action.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// A fetched row failed shape validation.
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// The backend could not be reached.
    #[error("network failure: {0}")]
    Network(String),
    /// The backend refused the request.
    #[error("server rejected request ({status}): {message}")]
    ServerRejected {
        /// HTTP-like status code returned by the backend.
        status: u16,
        /// Short description of the rejected request.
        message: String,
    },
    /// No event is currently loaded.
    #[error("no event loaded")]
    Degraded,
}

impl ServiceError {
    /// Message suitable for display next to the control that triggered the failure.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::NotFound(what) => format!("{what} could not be found"),
            ServiceError::Unauthorized(reason) => format!("Not allowed: {reason}"),
            ServiceError::InvalidData(_) => "Received malformed data from the server".into(),
            ServiceError::Network(_) => "Could not reach the server".into(),
            ServiceError::ServerRejected { status, .. } => {
                format!("The server rejected the request (status {status})")
            }
            ServiceError::Degraded => "No event is loaded".into(),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable { message, .. } => ServiceError::Network(message),
            StorageError::Rejected { path, status } => ServiceError::ServerRejected {
                status,
                message: path,
            },
            StorageError::Decode { path, source } => {
                ServiceError::InvalidData(format!("{path}: {source}"))
            }
            StorageError::Credential(message) => ServiceError::Unauthorized(message),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidData(err.to_string())
    }
}

/// Errors converted to HTTP responses by the companion service.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Viewer not allowed to perform the request.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Upstream backend failed or refused the request.
    #[error("bad gateway: {0}")]
    BadGateway(String),
    /// Service not ready (no event loaded).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.user_message();
        match err {
            ServiceError::NotFound(_) => AppError::NotFound(message),
            ServiceError::Unauthorized(_) => AppError::Forbidden(message),
            ServiceError::InvalidData(_)
            | ServiceError::Network(_)
            | ServiceError::ServerRejected { .. } => AppError::BadGateway(message),
            ServiceError::Degraded => AppError::ServiceUnavailable(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_taxonomy() {
        let rejected: ServiceError = StorageError::Rejected {
            path: "events".into(),
            status: 409,
        }
        .into();
        assert!(matches!(
            rejected,
            ServiceError::ServerRejected { status: 409, .. }
        ));

        let io = std::io::Error::other("connection reset");
        let network: ServiceError = StorageError::unavailable("events".into(), io).into();
        assert!(matches!(network, ServiceError::Network(_)));
    }

    #[test]
    fn user_messages_hide_internal_detail() {
        let err = ServiceError::Network("tcp connect error: 10.0.0.3:443".into());
        assert_eq!(err.user_message(), "Could not reach the server");
        assert!(!err.user_message().contains("10.0.0.3"));
    }
}

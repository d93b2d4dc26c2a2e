// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kit_storage::StorageError;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

/// HTTP API error type
#[derive(Debug)]
pub enum ApiError {
    /// Record not found (404)
    NotFound(String),

    /// Invalid input (400)
    BadRequest(String),

    /// Validation failed (422)
    ValidationFailed(String),

    /// Internal server error (500)
    Internal(String),
}

/// Result type for API handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::ValidationFailed(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "kind": "Status",
            "status": "Failure",
            "message": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StorageError::InvalidRecord { .. } => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

/// Errors of the command-line client
#[derive(Error, Debug, Diagnostic)]
pub enum ClientError {
    /// The manager could not be reached
    #[error("Request to {url} failed: {message}")]
    #[diagnostic(
        code(kit::client::request_failed),
        help("Check that `kit run` is listening on the address passed with --server")
    )]
    RequestFailed {
        #[allow(unused)]
        url: String,
        #[allow(unused)]
        message: String,
    },

    /// The manager answered with an error status
    #[error("{method} {url} returned {status}: {body}")]
    #[diagnostic(code(kit::client::unexpected_status))]
    UnexpectedStatus {
        #[allow(unused)]
        method: String,
        #[allow(unused)]
        url: String,
        #[allow(unused)]
        status: u16,
        #[allow(unused)]
        body: String,
    },

    /// No ControlPlane with that name
    #[error("ControlPlane {name} not found")]
    #[diagnostic(
        code(kit::client::not_found),
        help("List the known control planes with `kit status`")
    )]
    NotFound {
        #[allow(unused)]
        name: String,
    },

    /// A manifest or response could not be decoded
    #[error("Invalid document: {message}")]
    #[diagnostic(code(kit::client::invalid_document))]
    InvalidDocument {
        #[allow(unused)]
        message: String,
    },
}

impl ClientError {
    pub fn request_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_to_status_codes() {
        let not_found: ApiError = StorageError::not_found("ControlPlane/default/demo").into();
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let invalid: ApiError =
            StorageError::invalid_record("ControlPlane/default/demo", "no spec").into();
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);

        let txn: ApiError = StorageError::transaction_error("busy").into();
        assert_eq!(txn.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

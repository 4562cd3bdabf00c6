//! Error types for subscription management, payload decoding, and the
//! backend boundary.
//!
//! [`NotifyError`] is returned synchronously by every registry call and
//! maps to a structured JSON response on the delivery endpoint.
//! [`DecodeError`] never reaches a handler: the dispatcher reports it on
//! the error channel and moves on.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// ```json
/// {
///   "error": {
///     "code": 3001,
///     "message": "dispatcher inbox is closed"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

/// Failure reported by a notification backend.
///
/// Backends are external collaborators; the registry only needs their
/// message to surface it as [`NotifyError::BackendRejected`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    /// Creates a backend error from any displayable message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Subscription management and transport errors.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                 |
/// |-----------|-----------------|-----------------------------|
/// | 1000–1999 | Request         | 400 Bad Request / 409       |
/// | 2000–2999 | Backend         | 502 / 503                   |
/// | 3000–3999 | Process-local   | 500 / 503                   |
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    /// The backing session is not live.
    #[error("connection is not live")]
    InvalidConnection,

    /// A live subscription already uses this name.
    #[error("subscription name already registered: {0}")]
    DuplicateName(String),

    /// The backend refused the request.
    #[error("backend rejected request: {0}")]
    BackendRejected(String),

    /// The subscription behind this handle has been torn down.
    #[error("subscription handle is no longer valid: {0}")]
    InvalidHandle(String),

    /// The query cannot be watched.
    #[error("query cannot be watched: {0}")]
    UnsupportedQuery(String),

    /// A process-wide error sink is already installed.
    #[error("an error sink is already installed")]
    ErrorSinkInstalled,

    /// The dispatcher no longer accepts payloads.
    #[error("dispatcher inbox is closed")]
    InboxClosed,

    /// The dispatcher is behind and the inbound queue is full.
    #[error("dispatcher inbox is full")]
    InboxFull,
}

impl NotifyError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::DuplicateName(_) => 1001,
            Self::InvalidHandle(_) => 1002,
            Self::UnsupportedQuery(_) => 1003,
            Self::InvalidConnection => 2001,
            Self::BackendRejected(_) => 2002,
            Self::ErrorSinkInstalled => 3000,
            Self::InboxClosed => 3001,
            Self::InboxFull => 3002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedQuery(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateName(_) | Self::InvalidHandle(_) => StatusCode::CONFLICT,
            Self::BackendRejected(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidConnection | Self::InboxClosed | Self::InboxFull => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::ErrorSinkInstalled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BackendError> for NotifyError {
    fn from(err: BackendError) -> Self {
        Self::BackendRejected(err.0)
    }
}

impl IntoResponse for NotifyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Failure to turn a raw notification payload into an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not a well-formed notification object.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// A field required by the payload's kind is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// An event or operation code this build does not know.
    #[error("unknown code: {0:#x}")]
    UnknownCode(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_maps_to_rejected() {
        let err: NotifyError = BackendError::new("port unreachable").into();
        assert_eq!(err, NotifyError::BackendRejected("port unreachable".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn codes_are_grouped_by_category() {
        assert_eq!(NotifyError::DuplicateName("a".into()).error_code(), 1001);
        assert_eq!(NotifyError::InvalidConnection.error_code(), 2001);
        assert_eq!(NotifyError::InboxClosed.error_code(), 3001);
    }

    #[test]
    fn unknown_code_displays_hex() {
        assert_eq!(DecodeError::UnknownCode(0x40).to_string(), "unknown code: 0x40");
    }
}

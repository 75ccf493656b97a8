//! HTTP-facing failure type.
//!
//! Wraps the protocol-level [`SessionError`] so it can be returned from
//! axum handlers as the JSON error envelope.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use irma_core::messages::{ErrorKind, SessionError};
use thiserror::Error;

/// Content type for structured responses.
pub const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";

/// A session failure as surfaced over HTTP.
#[derive(Debug, Clone, Error)]
#[error(transparent)]
pub struct ApiFailure(pub SessionError);

impl ApiFailure {
    /// A failure of the given kind with its default HTTP status.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self(SessionError::new(kind))
    }

    /// No session under the presented token.
    #[must_use]
    pub fn unknown_session() -> Self {
        Self::new(ErrorKind::UnknownSession)
    }

    /// The operation is not legal in the session's current status.
    #[must_use]
    pub fn unexpected_request() -> Self {
        Self::new(ErrorKind::UnexpectedRequest)
    }

    /// Attaches a detail message.
    #[must_use]
    pub fn with_message(self, message: impl Into<String>) -> Self {
        Self(self.0.with_message(message))
    }

    /// The error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }
}

impl From<SessionError> for ApiFailure {
    fn from(err: SessionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let envelope = self.0.to_envelope();
        let status =
            StatusCode::from_u16(envelope.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::to_string(&envelope).unwrap_or_else(|_| {
            // The envelope is plain data; serialization cannot realistically
            // fail, but never panic in a response path.
            format!("{{\"status\":{},\"error\":\"{}\"}}", envelope.status, envelope.error)
        });
        (
            status,
            [(header::CONTENT_TYPE, CONTENT_TYPE_JSON)],
            body,
        )
            .into_response()
    }
}

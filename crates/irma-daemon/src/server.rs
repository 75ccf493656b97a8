//! The HTTP surface.
//!
//! Two path prefixes on one router: `/session/` for requestors and
//! `/irma/` for IRMA clients. Handlers here are thin wrappers around
//! [`gate`](crate::gate) and [`handlers`](crate::handlers); all protocol
//! decisions live there, which is also where the tests exercise them.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::KeepAlive;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{delete, get, post};
use axum::Router;
use irma_core::identifiers::SessionToken;
use irma_core::messages::{ErrorKind, ProofMessage, SessionError};
use irma_core::version::ProtocolVersion;
use serde::{Deserialize, Serialize};

use crate::error::{ApiFailure, CONTENT_TYPE_JSON};
use crate::notifier::sse_events;
use crate::session::{MAX_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION};
use crate::state::SharedState;
use crate::{gate, handlers};

/// Builds the router serving both the requestor and the client surface.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/session/", post(create_session))
        .route("/session/{token}", delete(cancel))
        .route("/session/{token}/status", get(status))
        .route("/session/{token}/statusevents", get(status_events))
        .route("/session/{token}/result", get(result))
        .route("/irma/{token}", get(session_info).delete(cancel))
        .route("/irma/{token}/proofs", post(proofs))
        .with_state(state)
}

/// Renders a structured 200 response with an explicit charset.
fn json_ok<T: Serialize>(value: &T) -> Response {
    match serde_json::to_string(value) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CONTENT_TYPE_JSON)],
            body,
        )
            .into_response(),
        Err(e) => ApiFailure(
            SessionError::new(ErrorKind::Serialization).with_message(e.to_string()),
        )
        .into_response(),
    }
}

/// Parses a path token. Malformed tokens are indistinguishable from
/// unknown sessions.
fn parse_token(raw: &str) -> Result<SessionToken, ApiFailure> {
    SessionToken::parse(raw).ok_or_else(ApiFailure::unknown_session)
}

/// The client's protocol version range, as query parameters on the first
/// GET. Clients predating version negotiation send nothing and get the
/// full server range.
#[derive(Debug, Deserialize)]
struct VersionRange {
    v: Option<ProtocolVersion>,
    vmax: Option<ProtocolVersion>,
}

async fn create_session(State(state): State<SharedState>, body: Bytes) -> Response {
    match gate::new_session(&state, &body) {
        Ok(qr) => json_ok(&qr),
        Err(failure) => failure.into_response(),
    }
}

async fn session_info(
    State(state): State<SharedState>,
    Path(token): Path<String>,
    Query(range): Query<VersionRange>,
) -> Response {
    let outcome = parse_token(&token).and_then(|token| {
        handlers::get_session_info(
            &state,
            &token,
            range.v.unwrap_or(MIN_PROTOCOL_VERSION),
            range.vmax.unwrap_or(MAX_PROTOCOL_VERSION),
        )
    });
    match outcome {
        Ok(info) => json_ok(&info),
        Err(failure) => failure.into_response(),
    }
}

async fn proofs(
    State(state): State<SharedState>,
    Path(token): Path<String>,
    body: Bytes,
) -> Response {
    let outcome = parse_token(&token).and_then(|token| {
        let message: ProofMessage = serde_json::from_slice(&body).map_err(|e| {
            ApiFailure(
                SessionError::new(ErrorKind::Serialization)
                    .with_status(400)
                    .with_message(e.to_string()),
            )
        })?;
        handlers::submit_response(&state, &token, &message)
    });
    match outcome {
        Ok(result) => json_ok(&result),
        Err(failure) => failure.into_response(),
    }
}

/// Cancellation, from either surface. DELETE returns no body.
async fn cancel(State(state): State<SharedState>, Path(token): Path<String>) -> Response {
    match parse_token(&token).and_then(|token| handlers::cancel_session(&state, &token)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(failure) => failure.into_response(),
    }
}

async fn status(State(state): State<SharedState>, Path(token): Path<String>) -> Response {
    match parse_token(&token).and_then(|token| handlers::session_status(&state, &token)) {
        Ok(status) => json_ok(&status),
        Err(failure) => failure.into_response(),
    }
}

async fn status_events(State(state): State<SharedState>, Path(token): Path<String>) -> Response {
    match parse_token(&token).and_then(|token| handlers::subscribe_status(&state, &token)) {
        Ok(stream) => Sse::new(sse_events(stream))
            .keep_alive(KeepAlive::default())
            .into_response(),
        Err(failure) => failure.into_response(),
    }
}

async fn result(State(state): State<SharedState>, Path(token): Path<String>) -> Response {
    match parse_token(&token).and_then(|token| handlers::session_result(&state, &token)) {
        Ok(result) => json_ok(&result),
        Err(failure) => failure.into_response(),
    }
}

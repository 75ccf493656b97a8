//! Session handlers: the operations the client invokes against a running
//! session, plus the status and result reads shared with the requestor
//! surface.
//!
//! Every handler follows the same discipline: look the session up (the
//! store lock is released by then), acquire the session mutex, validate
//! the pre-state, refresh the activity timestamp, do the work, release.
//! An operation whose pre-state does not hold returns `unexpectedRequest`
//! without side effect. Concurrent attempts to advance from the same
//! pre-state serialize on the session mutex; only the first one finds the
//! pre-state intact.

use std::collections::BTreeMap;
use std::sync::Arc;

use irma_core::identifiers::SessionToken;
use irma_core::messages::{ErrorKind, ProofMessage, SessionInfo, SessionResult, Status};
use irma_core::requests::SessionRequest;
use irma_core::version::ProtocolVersion;

use crate::error::ApiFailure;
use crate::notifier::StatusStream;
use crate::session::{Session, MAX_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION};
use crate::state::ServerState;
use crate::store::SessionStore as _;
use crate::verifier::VerificationInput;

fn lookup(state: &ServerState, token: &SessionToken) -> Result<Arc<Session>, ApiFailure> {
    state
        .store()
        .get(token)
        .ok_or_else(ApiFailure::unknown_session)
}

/// The first client message: fetches the session info, negotiating the
/// protocol version on first contact.
///
/// A repeated fetch while CONNECTED is idempotent: the client gets the
/// same session info again and nothing changes.
///
/// # Errors
///
/// `unknownSession` for unknown tokens, `protocolVersionNotSupported`
/// when the ranges do not overlap (the session moves to CANCELLED), and
/// `unexpectedRequest` in any other status.
pub fn get_session_info(
    state: &ServerState,
    token: &SessionToken,
    client_min: ProtocolVersion,
    client_max: ProtocolVersion,
) -> Result<SessionInfo, ApiFailure> {
    let session = lookup(state, token)?;
    let mut guard = session.lock();

    match guard.status() {
        Status::Initialized => {
            let Some(version) = ProtocolVersion::negotiate(
                MIN_PROTOCOL_VERSION,
                MAX_PROTOCOL_VERSION,
                client_min,
                client_max,
            ) else {
                tracing::info!(
                    session = %token,
                    client_min = %client_min,
                    client_max = %client_max,
                    "no protocol version in common with client"
                );
                guard.result_mut().err = Some(ErrorKind::ProtocolVersionNotSupported);
                guard.set_status(Status::Cancelled);
                drop(guard);
                state.store().update(&session);
                return Err(ApiFailure::new(ErrorKind::ProtocolVersionNotSupported));
            };
            guard.set_version(version);
            guard.mark_alive();
            guard.set_status(Status::Connected);
            let info = session_info(&session);
            drop(guard);
            state.store().update(&session);
            Ok(info)
        }
        // The client reconnected; serve the same answer again.
        Status::Connected => {
            guard.mark_alive();
            Ok(session_info(&session))
        }
        _ => Err(ApiFailure::unexpected_request()),
    }
}

fn session_info(session: &Session) -> SessionInfo {
    SessionInfo {
        jwt: session.jwt().to_owned(),
        nonce: session.nonce().clone(),
        context: session.context().clone(),
        keys: issuance_keys(session.request()),
    }
}

/// Public key counters per issuer, for issuance sessions. Empty for the
/// other actions.
fn issuance_keys(
    request: &SessionRequest,
) -> BTreeMap<irma_core::identifiers::IssuerIdentifier, u32> {
    let SessionRequest::Issue(issuance) = request else {
        return BTreeMap::new();
    };
    let mut keys = BTreeMap::new();
    for credential in &issuance.credentials {
        let issuer = credential.credential_type.issuer();
        let counter = keys.entry(issuer).or_insert(credential.key_counter);
        *counter = (*counter).max(credential.key_counter);
    }
    keys
}

/// The client's response: verifies the submitted proofs and finishes the
/// session.
///
/// # Errors
///
/// `unknownSession` for unknown tokens and `unexpectedRequest` unless the
/// session is CONNECTED. Verification failures cancel the session and
/// surface as their own kind (`rejected`, `crypto`, `keyshare`,
/// `keyshareBlocked`).
pub fn submit_response(
    state: &ServerState,
    token: &SessionToken,
    message: &ProofMessage,
) -> Result<SessionResult, ApiFailure> {
    let session = lookup(state, token)?;
    let mut guard = session.lock();

    if guard.status() != Status::Connected {
        return Err(ApiFailure::unexpected_request());
    }
    guard.mark_alive();
    guard.set_status(Status::Communicating);

    let input = VerificationInput {
        action: session.action(),
        request: session.request(),
        nonce: session.nonce(),
        context: session.context(),
        message,
    };
    // Verification is CPU-only; the mutex stays held so that the outcome
    // and the status change are one atomic step.
    match state.verifier().verify(&input) {
        Ok(outcome) => {
            let result = guard.result_mut();
            result.disclosed = outcome.disclosed;
            result.signature = outcome.signature;
            guard.set_kss_proofs(outcome.kss_proofs);
            guard.set_status(Status::Done);
            let result = guard.result().clone();
            drop(guard);
            state.store().update(&session);
            Ok(result)
        }
        Err(err) => {
            let kind = err.kind();
            tracing::info!(session = %token, error = %kind, "proof verification failed");
            guard.result_mut().err = Some(kind);
            guard.set_status(Status::Cancelled);
            drop(guard);
            state.store().update(&session);
            Err(ApiFailure::new(kind).with_message(err.to_string()))
        }
    }
}

/// Cancels the session. Both the client DELETE and the requestor DELETE
/// land here. Idempotent on terminal states.
///
/// # Errors
///
/// `unknownSession` for unknown tokens.
pub fn cancel_session(state: &ServerState, token: &SessionToken) -> Result<(), ApiFailure> {
    let session = lookup(state, token)?;
    let mut guard = session.lock();
    if !guard.status().finished() {
        guard.mark_alive();
        guard.set_status(Status::Cancelled);
        drop(guard);
        state.store().update(&session);
    }
    Ok(())
}

/// Single status poll.
///
/// # Errors
///
/// `unknownSession` for unknown tokens.
pub fn session_status(state: &ServerState, token: &SessionToken) -> Result<Status, ApiFailure> {
    Ok(lookup(state, token)?.lock().status())
}

/// The session result, available once the session has finished.
///
/// # Errors
///
/// `unknownSession` for unknown tokens, `unexpectedRequest` while the
/// session is still running.
pub fn session_result(
    state: &ServerState,
    token: &SessionToken,
) -> Result<SessionResult, ApiFailure> {
    let session = lookup(state, token)?;
    let guard = session.lock();
    if !guard.status().finished() {
        return Err(ApiFailure::unexpected_request()
            .with_message(format!("session status is {}", guard.status())));
    }
    Ok(guard.result().clone())
}

/// Attaches a status subscriber, replacing any previous one.
///
/// The stream starts with the current status and ends once the status
/// turns terminal.
///
/// # Errors
///
/// `unknownSession` for unknown tokens.
pub fn subscribe_status(
    state: &ServerState,
    token: &SessionToken,
) -> Result<StatusStream, ApiFailure> {
    let session = lookup(state, token)?;
    let rx = session.lock().subscribe();
    Ok(StatusStream::new(rx))
}

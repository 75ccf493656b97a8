//! The requestor gate: accepts a session request from the outside,
//! authenticates the requestor, authorizes the attributes it asks for,
//! and creates the session.
//!
//! Two entry modes, per the server configuration: a signed JWT whose
//! `iss` names a configured requestor, or a plain JSON body when
//! requestor authentication is disabled.

use std::sync::Arc;

use chrono::Utc;
use irma_core::identifiers::SessionToken;
use irma_core::jwt::{self, RequestorClaims};
use irma_core::messages::{ErrorKind, Qr};
use irma_core::requests::SessionRequest;

use crate::error::ApiFailure;
use crate::session::{Session, MAX_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION};
use crate::state::ServerState;
use crate::store::{SessionStore as _, StoreError};

fn invalid_jwt(message: impl Into<String>) -> ApiFailure {
    ApiFailure::new(ErrorKind::InvalidJwt).with_message(message)
}

/// Creates a new session from a requestor submission.
///
/// With requestor authentication enabled the body must be a JWT; without
/// it, a plain JSON session request. Returns the QR payload the requestor
/// shows to the user.
///
/// # Errors
///
/// `invalidJwt` for every JWT defect (malformed, stale, unknown issuer,
/// bad signature, subject/payload mismatch), `serialization` for
/// unparsable JSON, and `api` when the requestor is not authorized for
/// the attributes it asks for.
pub fn new_session(state: &ServerState, body: &[u8]) -> Result<Qr, ApiFailure> {
    let (request, requestor, requestor_jwt) = if state.config().requestor_auth_enabled() {
        let (request, requestor, token) = authenticate(state, body)?;
        (request, Some(requestor), Some(token))
    } else {
        let request: SessionRequest = serde_json::from_slice(body).map_err(|e| {
            ApiFailure(
                irma_core::messages::SessionError::new(ErrorKind::Serialization)
                    .with_status(400)
                    .with_message(e.to_string()),
            )
        })?;
        (request, None, None)
    };

    request.validate().map_err(|e| {
        ApiFailure(
            irma_core::messages::SessionError::new(ErrorKind::Api)
                .with_status(400)
                .with_message(e.to_string()),
        )
    })?;
    authorize(state, requestor.as_deref(), &request)?;

    let action = request.action();

    // The statement served to the client: the requestor's own JWT when it
    // authenticated with one, a server-signed statement otherwise.
    let statement = match requestor_jwt {
        Some(token) => token,
        None => sign_statement(state, &request)?,
    };

    // Token collisions are astronomically unlikely but the store rejects
    // them; retry with a fresh token.
    let session = loop {
        let token = SessionToken::random();
        let session = Arc::new(Session::new(
            token,
            request.clone(),
            statement.clone(),
            requestor.clone(),
        ));
        match state.store().add(Arc::clone(&session)) {
            Ok(()) => break session,
            Err(StoreError::DuplicateToken) => continue,
        }
    };

    tracing::debug!(
        session = %session.token(),
        action = %action,
        requestor = requestor.as_deref().unwrap_or("-"),
        "new session started"
    );

    Ok(Qr {
        url: format!(
            "{}/irma/{}",
            state.config().url.trim_end_matches('/'),
            session.token()
        ),
        action,
        version: MIN_PROTOCOL_VERSION,
        max_version: MAX_PROTOCOL_VERSION,
    })
}

/// Validates a requestor JWT and extracts its session request.
///
/// Returns the request, the requestor name, and the original token.
fn authenticate(
    state: &ServerState,
    body: &[u8],
) -> Result<(SessionRequest, String, String), ApiFailure> {
    let token = std::str::from_utf8(body)
        .map_err(|_| invalid_jwt("body is not UTF-8"))?
        .trim()
        .to_owned();

    // Peek at the issuer first; the key to verify against depends on it.
    let (_, claims) = jwt::decode_unverified(&token).map_err(|e| invalid_jwt(e.to_string()))?;
    let issuer = claims
        .get("iss")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| invalid_jwt("missing iss"))?;

    let requestor = state
        .config()
        .requestors
        .get(issuer)
        .ok_or_else(|| invalid_jwt(format!("unknown requestor {issuer:?}")))?;
    let key = requestor
        .key_bytes()
        .map_err(|e| invalid_jwt(e.to_string()))?;

    let claims = jwt::verify(&token, &key).map_err(|e| invalid_jwt(e.to_string()))?;

    let iat = claims
        .get("iat")
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| invalid_jwt("missing iat"))?;
    let age = Utc::now().timestamp() - iat;
    if u64::try_from(age).map_or(true, |a| a > state.config().max_request_age()) {
        return Err(invalid_jwt("jwt issued too long ago"));
    }

    let claims: RequestorClaims =
        serde_json::from_value(claims).map_err(|e| invalid_jwt(e.to_string()))?;
    let request = claims
        .into_request()
        .ok_or_else(|| invalid_jwt("subject does not match request payload"))?;

    Ok((request, issuer.to_owned(), token))
}

/// Checks that every attribute the request names is covered by the
/// requestor's permissions.
fn authorize(
    state: &ServerState,
    requestor: Option<&str>,
    request: &SessionRequest,
) -> Result<(), ApiFailure> {
    let permissions = state.config().permissions_for(requestor);
    permissions
        .authorize(request.action(), &request.attributes())
        .map_err(|attribute| {
            tracing::warn!(
                requestor = requestor.unwrap_or("-"),
                attribute = %attribute,
                action = %request.action(),
                "request not authorized"
            );
            ApiFailure(
                irma_core::messages::SessionError::new(ErrorKind::Api)
                    .with_message(format!("not authorized for {attribute}")),
            )
        })
}

/// Signs the session request under the server's own JWT issuer name, for
/// sessions created without requestor authentication.
///
/// Without a configured signing key the statement is empty, matching a
/// server whose JWT surface is disabled.
fn sign_statement(state: &ServerState, request: &SessionRequest) -> Result<String, ApiFailure> {
    let Some(key) = state.jwt_secret() else {
        tracing::debug!("no jwt key configured, serving unsigned session statement");
        return Ok(String::new());
    };
    let claims = RequestorClaims::from_request(
        Some(state.config().jwt_issuer().to_owned()),
        Utc::now().timestamp(),
        request.clone(),
    );
    jwt::sign(&claims, key).map_err(|e| {
        ApiFailure(
            irma_core::messages::SessionError::new(ErrorKind::Serialization)
                .with_message(e.to_string()),
        )
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use irma_core::identifiers::{AttributePattern, AttributeTypeIdentifier};
    use irma_core::messages::Action;
    use irma_core::requests::{AttributeDisjunction, BaseRequest, DisclosureRequest};

    use super::*;
    use crate::config::{Permissions, Requestor, ServerConfig};
    use crate::verifier::{
        ProofVerifier, VerificationError, VerificationInput, VerificationOutcome,
    };

    struct AcceptAll;
    impl ProofVerifier for AcceptAll {
        fn verify(
            &self,
            _input: &VerificationInput<'_>,
        ) -> Result<VerificationOutcome, VerificationError> {
            Ok(VerificationOutcome::default())
        }
    }

    const REQUESTOR_KEY: &[u8] = b"requestor-hmac-key";

    fn open_state() -> ServerState {
        let config = ServerConfig {
            url: "https://irma.example.com".into(),
            jwt_secret: Some(STANDARD.encode(b"server-signing-key")),
            ..Default::default()
        };
        ServerState::new(config, Arc::new(AcceptAll)).unwrap()
    }

    fn authenticated_state() -> ServerState {
        let mut requestors = HashMap::new();
        requestors.insert(
            "verifier".to_owned(),
            Requestor {
                key: STANDARD.encode(REQUESTOR_KEY),
                permissions: Permissions {
                    disclosing: vec![AttributePattern::from("irma-demo.*")],
                    ..Default::default()
                },
            },
        );
        let config = ServerConfig {
            url: "https://irma.example.com".into(),
            production: true,
            requestors,
            ..Default::default()
        };
        ServerState::new(config, Arc::new(AcceptAll)).unwrap()
    }

    fn disclosure() -> SessionRequest {
        SessionRequest::Disclose(DisclosureRequest {
            base: BaseRequest::default(),
            content: vec![AttributeDisjunction {
                label: "Age limit".into(),
                attributes: vec![AttributeTypeIdentifier::new(
                    "irma-demo.MijnOverheid.ageLower.over18",
                )],
            }],
        })
    }

    fn requestor_jwt(iat: i64) -> String {
        let claims = RequestorClaims::from_request(Some("verifier".into()), iat, disclosure());
        jwt::sign(&claims, REQUESTOR_KEY).unwrap()
    }

    #[test]
    fn plain_json_session_without_auth() {
        let state = open_state();
        let body = serde_json::to_vec(&disclosure()).unwrap();

        let qr = new_session(&state, &body).unwrap();
        assert_eq!(qr.action, Action::Disclosing);
        assert!(qr.url.starts_with("https://irma.example.com/irma/"));
        let token = qr.url.rsplit('/').next().unwrap();
        assert_eq!(token.len(), 20);
        assert_eq!(state.store().len(), 1);

        // The stored session carries a server-signed statement.
        let token = SessionToken::parse(token).unwrap();
        let session = state.store().get(&token).unwrap();
        let claims = jwt::verify(session.jwt(), b"server-signing-key").unwrap();
        assert_eq!(claims["iss"], "irmaserver");
    }

    #[test]
    fn malformed_json_is_a_client_error() {
        let state = open_state();
        let err = new_session(&state, b"{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
        assert_eq!(err.0.status, 400);
    }

    #[test]
    fn invalid_request_is_rejected() {
        let state = open_state();
        let body = serde_json::to_vec(&SessionRequest::Disclose(DisclosureRequest {
            base: BaseRequest::default(),
            content: vec![],
        }))
        .unwrap();
        let err = new_session(&state, &body).unwrap_err();
        assert_eq!(err.0.status, 400);
    }

    #[test]
    fn jwt_session_round_trip() {
        let state = authenticated_state();
        let token = requestor_jwt(Utc::now().timestamp());

        let qr = new_session(&state, token.as_bytes()).unwrap();
        assert_eq!(qr.action, Action::Disclosing);

        // The requestor's own JWT is echoed to the client.
        let session_token =
            SessionToken::parse(qr.url.rsplit('/').next().unwrap()).unwrap();
        let session = state.store().get(&session_token).unwrap();
        assert_eq!(session.jwt(), token);
        assert_eq!(session.requestor(), Some("verifier"));
    }

    #[test]
    fn stale_jwt_is_rejected() {
        let state = authenticated_state();
        let token = requestor_jwt(Utc::now().timestamp() - 301);
        let err = new_session(&state, token.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidJwt);
    }

    #[test]
    fn unknown_issuer_is_rejected() {
        let state = authenticated_state();
        let claims = RequestorClaims::from_request(
            Some("nobody".into()),
            Utc::now().timestamp(),
            disclosure(),
        );
        let token = jwt::sign(&claims, REQUESTOR_KEY).unwrap();
        let err = new_session(&state, token.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidJwt);
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let state = authenticated_state();
        let claims = RequestorClaims::from_request(
            Some("verifier".into()),
            Utc::now().timestamp(),
            disclosure(),
        );
        let token = jwt::sign(&claims, b"wrong-key").unwrap();
        let err = new_session(&state, token.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidJwt);
    }

    #[test]
    fn subject_payload_mismatch_is_rejected() {
        let state = authenticated_state();
        let mut claims = RequestorClaims::from_request(
            Some("verifier".into()),
            Utc::now().timestamp(),
            disclosure(),
        );
        claims.sub = jwt::SUBJECT_ISSUE.to_owned();
        let token = jwt::sign(&claims, REQUESTOR_KEY).unwrap();
        let err = new_session(&state, token.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidJwt);
    }

    #[test]
    fn unauthorized_attributes_are_refused() {
        let state = authenticated_state();
        let request = SessionRequest::Disclose(DisclosureRequest {
            base: BaseRequest::default(),
            content: vec![AttributeDisjunction {
                label: "Name".into(),
                attributes: vec![AttributeTypeIdentifier::new("pbdf.gemeente.personalData.fullname")],
            }],
        });
        let claims = RequestorClaims::from_request(
            Some("verifier".into()),
            Utc::now().timestamp(),
            request,
        );
        let token = jwt::sign(&claims, REQUESTOR_KEY).unwrap();
        let err = new_session(&state, token.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Api);
        assert_eq!(err.0.status, 403);
        assert!(state.store().is_empty());
    }

    #[test]
    fn issuance_is_denied_by_default() {
        let state = open_state();
        let request = SessionRequest::Issue(irma_core::requests::IssuanceRequest {
            base: BaseRequest::default(),
            credentials: vec![irma_core::requests::CredentialRequest {
                credential_type: irma_core::identifiers::CredentialTypeIdentifier::new(
                    "irma-demo.MijnOverheid.root",
                ),
                attributes: [("BSN".to_owned(), "12345".to_owned())].into(),
                key_counter: 0,
            }],
            disclose: vec![],
        });
        let body = serde_json::to_vec(&request).unwrap();
        let err = new_session(&state, &body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Api);
    }
}

//! Minimal JWS codec for requestor JWTs and server-signed session
//! statements.
//!
//! Only HS256 is supported. Tokens are the usual three base64url
//! segments; signatures are verified with a constant-time comparison.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::messages::Action;
use crate::requests::{DisclosureRequest, IssuanceRequest, SessionRequest, SignatureRequest};

type HmacSha256 = Hmac<Sha256>;

/// JWT subject for disclosure requests.
pub const SUBJECT_VERIFICATION: &str = "verification_request";
/// JWT subject for signature requests.
pub const SUBJECT_SIGNATURE: &str = "signature_request";
/// JWT subject for issuance requests.
pub const SUBJECT_ISSUE: &str = "issue_request";

/// Errors from JWT encoding, decoding or verification.
#[derive(Debug, Error)]
pub enum JwtError {
    /// The token does not have the `header.claims.signature` shape or a
    /// segment is not valid base64url.
    #[error("malformed JWT")]
    Malformed,
    /// The token's algorithm is not HS256.
    #[error("unsupported JWT algorithm {0:?}")]
    UnsupportedAlgorithm(String),
    /// The signature does not verify under the given key.
    #[error("JWT signature verification failed")]
    Signature,
    /// The HMAC key was rejected.
    #[error("invalid HMAC key")]
    Key,
    /// A segment failed to (de)serialize as JSON.
    #[error("JWT segment not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The JOSE header of a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    /// Signature algorithm.
    pub alg: String,
    /// Token type, conventionally `JWT`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// The claims of a requestor JWT or a server-signed session statement.
///
/// Exactly one of the request fields is present, and the subject names
/// which one: `verification_request` carries `sprequest`,
/// `signature_request` carries `absrequest`, `issue_request` carries
/// `iprequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestorClaims {
    /// The requestor (or the server itself, for server-signed
    /// statements).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Subject naming the request shape.
    pub sub: String,
    /// Disclosure request payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sprequest: Option<DisclosureRequest>,
    /// Signature request payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absrequest: Option<SignatureRequest>,
    /// Issuance request payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iprequest: Option<IssuanceRequest>,
}

impl RequestorClaims {
    /// Wraps a session request into claims under the matching subject.
    #[must_use]
    pub fn from_request(issuer: Option<String>, iat: i64, request: SessionRequest) -> Self {
        let mut claims = Self {
            iss: issuer,
            iat,
            sub: subject_for(request.action()).to_owned(),
            sprequest: None,
            absrequest: None,
            iprequest: None,
        };
        match request {
            SessionRequest::Disclose(r) => claims.sprequest = Some(r),
            SessionRequest::Sign(r) => claims.absrequest = Some(r),
            SessionRequest::Issue(r) => claims.iprequest = Some(r),
        }
        claims
    }

    /// Extracts the session request, checking that the subject matches
    /// the payload shape.
    ///
    /// Returns `None` when the subject is unknown, names an absent
    /// payload, or more than one payload is present.
    #[must_use]
    pub fn into_request(self) -> Option<SessionRequest> {
        let payloads =
            usize::from(self.sprequest.is_some()) + usize::from(self.absrequest.is_some())
                + usize::from(self.iprequest.is_some());
        if payloads != 1 {
            return None;
        }
        match self.sub.as_str() {
            SUBJECT_VERIFICATION => self.sprequest.map(SessionRequest::Disclose),
            SUBJECT_SIGNATURE => self.absrequest.map(SessionRequest::Sign),
            SUBJECT_ISSUE => self.iprequest.map(SessionRequest::Issue),
            _ => None,
        }
    }
}

/// The JWT subject used for requests of the given action.
#[must_use]
pub const fn subject_for(action: Action) -> &'static str {
    match action {
        Action::Disclosing => SUBJECT_VERIFICATION,
        Action::Signing => SUBJECT_SIGNATURE,
        Action::Issuing => SUBJECT_ISSUE,
    }
}

/// Signs claims into an HS256 token.
///
/// # Errors
///
/// Returns [`JwtError`] when the claims fail to serialize or the key is
/// rejected.
pub fn sign(claims: &impl Serialize, key: &[u8]) -> Result<String, JwtError> {
    let header = Header {
        alg: "HS256".to_owned(),
        typ: Some("JWT".to_owned()),
    };
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?),
    );
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| JwtError::Key)?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{signing_input}.{signature}"))
}

/// Splits a token and decodes its header and claims without verifying the
/// signature.
///
/// Use this only to discover the issuer before looking up its key; always
/// follow up with [`verify`].
///
/// # Errors
///
/// Returns [`JwtError::Malformed`] for anything that is not three
/// base64url JSON segments.
pub fn decode_unverified(token: &str) -> Result<(Header, serde_json::Value), JwtError> {
    let (header_b64, claims_b64, _) = split(token)?;
    let header: Header =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header_b64).map_err(|_| JwtError::Malformed)?)?;
    let claims: serde_json::Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(claims_b64).map_err(|_| JwtError::Malformed)?)?;
    Ok((header, claims))
}

/// Verifies a token's HS256 signature and returns its claims.
///
/// # Errors
///
/// Returns [`JwtError`] when the token is malformed, uses an algorithm
/// other than HS256, or the signature does not match.
pub fn verify(token: &str, key: &[u8]) -> Result<serde_json::Value, JwtError> {
    let (header, claims) = decode_unverified(token)?;
    if header.alg != "HS256" {
        return Err(JwtError::UnsupportedAlgorithm(header.alg));
    }

    let (header_b64, claims_b64, signature_b64) = split(token)?;
    let given = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| JwtError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| JwtError::Key)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(claims_b64.as_bytes());
    let computed = mac.finalize().into_bytes();

    if computed.ct_eq(&given).into() {
        Ok(claims)
    } else {
        Err(JwtError::Signature)
    }
}

fn split(token: &str) -> Result<(&str, &str, &str), JwtError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(c), Some(s), None) => Ok((h, c, s)),
        _ => Err(JwtError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::AttributeTypeIdentifier;
    use crate::requests::{AttributeDisjunction, BaseRequest};

    const KEY: &[u8] = b"test-requestor-key";

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

    #[test]
    fn sign_verify_round_trip() {
        let claims = RequestorClaims::from_request(Some("verifier".into()), 1_700_000_000, disclosure());
        let token = sign(&claims, KEY).unwrap();

        let value = verify(&token, KEY).unwrap();
        assert_eq!(value["iss"], "verifier");
        assert_eq!(value["sub"], SUBJECT_VERIFICATION);

        let back: RequestorClaims = serde_json::from_value(value).unwrap();
        assert_eq!(back.into_request().unwrap(), disclosure());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let claims = RequestorClaims::from_request(Some("verifier".into()), 0, disclosure());
        let token = sign(&claims, KEY).unwrap();
        assert!(matches!(
            verify(&token, b"some-other-key"),
            Err(JwtError::Signature)
        ));
    }

    #[test]
    fn tampered_claims_fail_verification() {
        let claims = RequestorClaims::from_request(Some("verifier".into()), 0, disclosure());
        let token = sign(&claims, KEY).unwrap();

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"iss":"attacker","iat":0,"sub":"verification_request"}"#);
        parts[1] = &forged;
        let tampered = parts.join(".");

        assert!(matches!(verify(&tampered, KEY), Err(JwtError::Signature)));
    }

    #[test]
    fn malformed_tokens() {
        assert!(matches!(decode_unverified("no-dots"), Err(JwtError::Malformed)));
        assert!(matches!(decode_unverified("a.b"), Err(JwtError::Malformed)));
        assert!(matches!(
            decode_unverified("!!!.###.$$$"),
            Err(JwtError::Malformed)
        ));
    }

    #[test]
    fn non_hs256_is_rejected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let claims = URL_SAFE_NO_PAD.encode(br#"{"iat":0}"#);
        let token = format!("{header}.{claims}.");
        assert!(matches!(
            verify(&token, KEY),
            Err(JwtError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn subject_must_match_payload_shape() {
        // Claims carrying a disclosure payload under the signature subject.
        let mut claims =
            RequestorClaims::from_request(None, 0, disclosure());
        claims.sub = SUBJECT_SIGNATURE.to_owned();
        assert!(claims.into_request().is_none());

        // Two payloads at once.
        let mut claims = RequestorClaims::from_request(None, 0, disclosure());
        claims.iprequest = Some(IssuanceRequest {
            base: BaseRequest::default(),
            credentials: vec![],
            disclose: vec![],
        });
        assert!(claims.into_request().is_none());
    }

    #[test]
    fn unknown_subject_is_rejected() {
        let mut claims = RequestorClaims::from_request(None, 0, disclosure());
        claims.sub = "something_request".to_owned();
        assert!(claims.into_request().is_none());
    }
}

//! The proof verification boundary.
//!
//! The session runtime never interprets cryptographic material itself: a
//! client response is handed to a [`ProofVerifier`] together with the
//! session's request, nonce and context, and the verifier either produces
//! a [`VerificationOutcome`] or a protocol failure. The heavy algebra
//! lives in the credential scheme library behind this trait.

use std::collections::BTreeMap;

use irma_core::bignum::Bignum;
use irma_core::identifiers::SchemeManagerIdentifier;
use irma_core::messages::{Action, DisclosedAttribute, ErrorKind, ProofMessage};
use irma_core::requests::AttributeDisjunction;
use irma_core::requests::SessionRequest;
use thiserror::Error;

/// Everything a verifier needs to judge a client response.
#[derive(Debug)]
pub struct VerificationInput<'a> {
    /// The session type.
    pub action: Action,
    /// The request the session was created for.
    pub request: &'a SessionRequest,
    /// The nonce the proofs must be bound to.
    pub nonce: &'a Bignum,
    /// The context the proofs must be bound to.
    pub context: &'a Bignum,
    /// The client's response payload.
    pub message: &'a ProofMessage,
}

/// What a successful verification produced.
#[derive(Debug, Default)]
pub struct VerificationOutcome {
    /// Attributes the client disclosed.
    pub disclosed: Vec<DisclosedAttribute>,
    /// The attribute-based signature, for signing sessions.
    pub signature: Option<serde_json::Value>,
    /// Keyshare server proofs per scheme, for issuance under protected
    /// schemes.
    pub kss_proofs: BTreeMap<SchemeManagerIdentifier, serde_json::Value>,
}

/// A failed verification. These are protocol failures, not server faults:
/// the session moves to CANCELLED and the kind is surfaced to both
/// parties.
#[derive(Debug, Clone, Error)]
pub enum VerificationError {
    /// The response is well-formed but does not satisfy the request.
    #[error("response rejected: {0}")]
    Rejected(String),
    /// The response is cryptographically unusable.
    #[error("crypto error: {0}")]
    Crypto(String),
    /// The keyshare part of the response failed.
    #[error("keyshare error: {0}")]
    Keyshare(String),
    /// The keyshare server has blocked the user.
    #[error("blocked by keyshare server")]
    KeyshareBlocked,
}

impl VerificationError {
    /// The stable error kind this failure maps to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Rejected(_) => ErrorKind::Rejected,
            Self::Crypto(_) => ErrorKind::Crypto,
            Self::Keyshare(_) => ErrorKind::Keyshare,
            Self::KeyshareBlocked => ErrorKind::KeyshareBlocked,
        }
    }
}

/// Verifies client responses. Implementations must be pure: no session
/// state, no blocking I/O.
pub trait ProofVerifier: Send + Sync {
    /// Judges a client response.
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError`] when the response does not verify.
    fn verify(&self, input: &VerificationInput<'_>)
        -> Result<VerificationOutcome, VerificationError>;
}

/// Structural verifier: checks nonce and context binding and extracts the
/// disclosed attributes, delegating nothing to a scheme library.
///
/// The expected payload is a JSON object carrying `nonce` and `context`
/// as decimal strings, a `disclosed` map from attribute identifier to
/// value, a `signature` object for signing sessions, and a `commitments`
/// object for issuance. Optional `proofPJwts` carries keyshare proofs per
/// scheme.
#[derive(Debug, Default)]
pub struct StructuralVerifier;

impl StructuralVerifier {
    fn check_binding(input: &VerificationInput<'_>) -> Result<(), VerificationError> {
        let payload = input
            .message
            .0
            .as_object()
            .ok_or_else(|| VerificationError::Crypto("response is not a JSON object".into()))?;

        for (field, expected) in [("nonce", input.nonce), ("context", input.context)] {
            let got = payload
                .get(field)
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| VerificationError::Crypto(format!("response lacks {field}")))?;
            if got != expected.to_decimal() {
                return Err(VerificationError::Rejected(format!("{field} mismatch")));
            }
        }
        Ok(())
    }

    fn disclosed(
        payload: &serde_json::Value,
        content: &[AttributeDisjunction],
    ) -> Result<Vec<DisclosedAttribute>, VerificationError> {
        let disclosed = payload
            .get("disclosed")
            .and_then(serde_json::Value::as_object)
            .ok_or_else(|| VerificationError::Crypto("response lacks disclosed attributes".into()))?;

        // Every requested disjunction must be satisfied by some disclosed
        // attribute.
        for disjunction in content {
            let satisfied = disjunction
                .attributes
                .iter()
                .any(|attr| disclosed.contains_key(attr.as_str()));
            if !satisfied {
                return Err(VerificationError::Rejected(format!(
                    "condition {:?} not satisfied",
                    disjunction.label
                )));
            }
        }

        disclosed
            .iter()
            .map(|(id, value)| {
                let value = value.as_str().ok_or_else(|| {
                    VerificationError::Crypto(format!("attribute {id} value is not a string"))
                })?;
                Ok(DisclosedAttribute {
                    id: id.as_str().into(),
                    value: value.to_owned(),
                })
            })
            .collect()
    }

    fn kss_proofs(
        payload: &serde_json::Value,
    ) -> BTreeMap<SchemeManagerIdentifier, serde_json::Value> {
        payload
            .get("proofPJwts")
            .and_then(serde_json::Value::as_object)
            .map(|jwts| {
                jwts.iter()
                    .map(|(scheme, proof)| {
                        (SchemeManagerIdentifier::new(scheme.clone()), proof.clone())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ProofVerifier for StructuralVerifier {
    fn verify(
        &self,
        input: &VerificationInput<'_>,
    ) -> Result<VerificationOutcome, VerificationError> {
        Self::check_binding(input)?;
        let payload = &input.message.0;

        match input.request {
            SessionRequest::Disclose(request) => Ok(VerificationOutcome {
                disclosed: Self::disclosed(payload, &request.content)?,
                ..Default::default()
            }),
            SessionRequest::Sign(request) => {
                let signature = payload
                    .get("signature")
                    .cloned()
                    .ok_or_else(|| VerificationError::Rejected("response lacks signature".into()))?;
                Ok(VerificationOutcome {
                    disclosed: Self::disclosed(payload, &request.content)?,
                    signature: Some(signature),
                    ..Default::default()
                })
            }
            SessionRequest::Issue(request) => {
                if payload.get("commitments").is_none() {
                    return Err(VerificationError::Crypto(
                        "issuance response lacks commitments".into(),
                    ));
                }
                let disclosed = if request.disclose.is_empty() {
                    Vec::new()
                } else {
                    Self::disclosed(payload, &request.disclose)?
                };
                Ok(VerificationOutcome {
                    disclosed,
                    kss_proofs: Self::kss_proofs(payload),
                    ..Default::default()
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use irma_core::identifiers::AttributeTypeIdentifier;
    use irma_core::requests::{BaseRequest, DisclosureRequest};
    use serde_json::json;

    use super::*;

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

    fn input<'a>(
        request: &'a SessionRequest,
        nonce: &'a Bignum,
        context: &'a Bignum,
        message: &'a ProofMessage,
    ) -> VerificationInput<'a> {
        VerificationInput {
            action: request.action(),
            request,
            nonce,
            context,
            message,
        }
    }

    #[test]
    fn accepts_well_formed_disclosure() {
        let request = disclosure();
        let nonce = Bignum::from_decimal("12345").unwrap();
        let context = Bignum::one();
        let message = ProofMessage(json!({
            "nonce": "12345",
            "context": "1",
            "disclosed": {"irma-demo.MijnOverheid.ageLower.over18": "yes"},
        }));

        let outcome = StructuralVerifier
            .verify(&input(&request, &nonce, &context, &message))
            .unwrap();
        assert_eq!(outcome.disclosed.len(), 1);
        assert_eq!(outcome.disclosed[0].value, "yes");
    }

    #[test]
    fn rejects_nonce_mismatch() {
        let request = disclosure();
        let nonce = Bignum::from_decimal("12345").unwrap();
        let context = Bignum::one();
        let message = ProofMessage(json!({
            "nonce": "99999",
            "context": "1",
            "disclosed": {"irma-demo.MijnOverheid.ageLower.over18": "yes"},
        }));

        let err = StructuralVerifier
            .verify(&input(&request, &nonce, &context, &message))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
    }

    #[test]
    fn rejects_unsatisfied_condition() {
        let request = disclosure();
        let nonce = Bignum::one();
        let context = Bignum::one();
        let message = ProofMessage(json!({
            "nonce": "1",
            "context": "1",
            "disclosed": {"irma-demo.MijnOverheid.fullName.name": "J. Doe"},
        }));

        let err = StructuralVerifier
            .verify(&input(&request, &nonce, &context, &message))
            .unwrap_err();
        assert!(matches!(err, VerificationError::Rejected(_)));
    }

    #[test]
    fn malformed_payload_is_a_crypto_error() {
        let request = disclosure();
        let nonce = Bignum::one();
        let context = Bignum::one();
        let message = ProofMessage(json!([1, 2, 3]));

        let err = StructuralVerifier
            .verify(&input(&request, &nonce, &context, &message))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Crypto);
    }

    #[test]
    fn issuance_collects_keyshare_proofs() {
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
        let nonce = Bignum::one();
        let context = Bignum::one();
        let message = ProofMessage(json!({
            "nonce": "1",
            "context": "1",
            "commitments": {"U": "314"},
            "proofPJwts": {"irma-demo": {"p": "159"}},
        }));

        let outcome = StructuralVerifier
            .verify(&input(&request, &nonce, &context, &message))
            .unwrap();
        assert_eq!(outcome.kss_proofs.len(), 1);
        assert!(outcome
            .kss_proofs
            .contains_key(&SchemeManagerIdentifier::new("irma-demo")));
    }
}

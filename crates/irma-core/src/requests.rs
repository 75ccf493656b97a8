//! Validated requestor intent: what the requestor asks the server to run.
//!
//! A session request is a tagged variant over disclose / sign / issue,
//! discriminated by the action field. Each variant has its own validator;
//! there is no shared validation hierarchy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bignum::Bignum;
use crate::identifiers::{AttributeTypeIdentifier, CredentialTypeIdentifier};
use crate::messages::Action;

/// Seconds the client has to complete a session once it has fetched the
/// session info, when the requestor does not override it.
pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 300;

/// Fields shared by every session request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseRequest {
    /// Seconds the client has to complete the session once connected.
    /// Zero means the default of five minutes.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub client_timeout: u64,

    /// If present, the final result is handed to the registered result
    /// listeners for delivery to this URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_callback_url: Option<String>,

    /// Nonce the client binds its proofs to. Whatever the requestor
    /// submits here is discarded: the server overwrites it with a fresh
    /// random value at session creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Bignum>,

    /// Context the client binds its proofs to. Overwritten with the
    /// constant 1 at session creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Bignum>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// A disjunction of attributes: the client satisfies it by disclosing any
/// one of the listed attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDisjunction {
    /// Human-readable label shown to the user.
    pub label: String,
    /// The attributes, any one of which satisfies the disjunction.
    pub attributes: Vec<AttributeTypeIdentifier>,
}

/// Request to disclose attributes: a conjunction of disjunctions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosureRequest {
    /// Shared base parameters.
    #[serde(flatten)]
    pub base: BaseRequest,
    /// The disclosure condition: every disjunction must be satisfied.
    pub content: Vec<AttributeDisjunction>,
}

/// Request for an attribute-based signature over a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    /// Shared base parameters.
    #[serde(flatten)]
    pub base: BaseRequest,
    /// The message to be signed.
    pub message: String,
    /// Attributes to sign with.
    pub content: Vec<AttributeDisjunction>,
}

/// One credential to be issued, with its attribute values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequest {
    /// The credential type to issue.
    #[serde(rename = "credential")]
    pub credential_type: CredentialTypeIdentifier,
    /// Attribute name to value.
    pub attributes: BTreeMap<String, String>,
    /// Issuer public key counter to issue under.
    #[serde(default)]
    pub key_counter: u32,
}

impl CredentialRequest {
    /// The attribute identifiers this credential carries.
    pub fn attribute_ids(&self) -> impl Iterator<Item = AttributeTypeIdentifier> + '_ {
        self.attributes
            .keys()
            .map(|name| self.credential_type.attribute(name))
    }
}

/// Request to issue credentials, optionally disclosing attributes in the
/// same session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceRequest {
    /// Shared base parameters.
    #[serde(flatten)]
    pub base: BaseRequest,
    /// The credentials to issue.
    pub credentials: Vec<CredentialRequest>,
    /// Attributes the client must disclose before issuance, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disclose: Vec<AttributeDisjunction>,
}

/// The validated requestor intent, tagged by action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionRequest {
    /// Disclose attributes.
    #[serde(rename = "disclosing")]
    Disclose(DisclosureRequest),
    /// Sign a message with attributes.
    #[serde(rename = "signing")]
    Sign(SignatureRequest),
    /// Issue credentials.
    #[serde(rename = "issuing")]
    Issue(IssuanceRequest),
}

/// A session request that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The request names no attributes or credentials at all.
    #[error("empty {0} request")]
    Empty(&'static str),
    /// A disjunction lists no attributes.
    #[error("empty disjunction {0:?}")]
    EmptyDisjunction(String),
    /// An identifier does not have the right dotted shape.
    #[error("malformed identifier {0:?}")]
    MalformedIdentifier(String),
    /// A signature request with nothing to sign.
    #[error("empty message in signature request")]
    EmptyMessage,
}

impl SessionRequest {
    /// The action this request asks for.
    #[must_use]
    pub const fn action(&self) -> Action {
        match self {
            Self::Disclose(_) => Action::Disclosing,
            Self::Sign(_) => Action::Signing,
            Self::Issue(_) => Action::Issuing,
        }
    }

    /// Shared base parameters.
    #[must_use]
    pub const fn base(&self) -> &BaseRequest {
        match self {
            Self::Disclose(r) => &r.base,
            Self::Sign(r) => &r.base,
            Self::Issue(r) => &r.base,
        }
    }

    /// Mutable access to the shared base parameters.
    pub fn base_mut(&mut self) -> &mut BaseRequest {
        match self {
            Self::Disclose(r) => &mut r.base,
            Self::Sign(r) => &mut r.base,
            Self::Issue(r) => &mut r.base,
        }
    }

    /// Every attribute this request names, for authorization.
    ///
    /// For issuance this includes both the attributes of the credentials
    /// to be issued and any attributes to be disclosed alongside.
    #[must_use]
    pub fn attributes(&self) -> Vec<AttributeTypeIdentifier> {
        match self {
            Self::Disclose(r) => disjunction_attributes(&r.content),
            Self::Sign(r) => disjunction_attributes(&r.content),
            Self::Issue(r) => {
                let mut attrs: Vec<_> = r
                    .credentials
                    .iter()
                    .flat_map(CredentialRequest::attribute_ids)
                    .collect();
                attrs.extend(disjunction_attributes(&r.disclose));
                attrs
            }
        }
    }

    /// Validates the request. Each variant has a distinct validator.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), RequestError> {
        match self {
            Self::Disclose(r) => validate_disclosure(r),
            Self::Sign(r) => validate_signature(r),
            Self::Issue(r) => validate_issuance(r),
        }
    }
}

fn disjunction_attributes(content: &[AttributeDisjunction]) -> Vec<AttributeTypeIdentifier> {
    content
        .iter()
        .flat_map(|d| d.attributes.iter().cloned())
        .collect()
}

fn validate_disjunctions(content: &[AttributeDisjunction]) -> Result<(), RequestError> {
    for disjunction in content {
        if disjunction.attributes.is_empty() {
            return Err(RequestError::EmptyDisjunction(disjunction.label.clone()));
        }
        for attr in &disjunction.attributes {
            if !attr.is_well_formed() {
                return Err(RequestError::MalformedIdentifier(attr.as_str().to_owned()));
            }
        }
    }
    Ok(())
}

fn validate_disclosure(request: &DisclosureRequest) -> Result<(), RequestError> {
    if request.content.is_empty() {
        return Err(RequestError::Empty("disclosure"));
    }
    validate_disjunctions(&request.content)
}

fn validate_signature(request: &SignatureRequest) -> Result<(), RequestError> {
    if request.message.is_empty() {
        return Err(RequestError::EmptyMessage);
    }
    if request.content.is_empty() {
        return Err(RequestError::Empty("signature"));
    }
    validate_disjunctions(&request.content)
}

fn validate_issuance(request: &IssuanceRequest) -> Result<(), RequestError> {
    if request.credentials.is_empty() {
        return Err(RequestError::Empty("issuance"));
    }
    for credential in &request.credentials {
        if !credential.credential_type.is_well_formed() {
            return Err(RequestError::MalformedIdentifier(
                credential.credential_type.as_str().to_owned(),
            ));
        }
    }
    validate_disjunctions(&request.disclose)
}

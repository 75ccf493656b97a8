//! Messages exchanged between requestor, server and client, and the
//! session error model.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bignum::Bignum;
use crate::identifiers::{AttributeTypeIdentifier, IssuerIdentifier, SessionToken};
use crate::version::ProtocolVersion;

/// The type of a session: what the client is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Disclose attributes to the requestor.
    Disclosing,
    /// Create an attribute-based signature over a message.
    Signing,
    /// Receive newly issued credentials.
    Issuing,
}

impl Action {
    /// The wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disclosing => "disclosing",
            Self::Signing => "signing",
            Self::Issuing => "issuing",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disclosing" => Ok(Self::Disclosing),
            "signing" => Ok(Self::Signing),
            "issuing" => Ok(Self::Issuing),
            other => Err(SessionError::new(ErrorKind::UnknownAction).with_message(other)),
        }
    }
}

/// The status of a session.
///
/// The declaration order is the event order: a session only ever moves to
/// a status that compares greater than or equal to its current one, so
/// `prev_status <= status` holds at every emission to a subscriber.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Created by the requestor; the client has not yet arrived.
    #[default]
    Initialized,
    /// The client fetched the session info and negotiated a version.
    Connected,
    /// The client submitted its response; verification is underway.
    Communicating,
    /// Terminal: cancelled by a party or rejected by verification.
    Cancelled,
    /// Terminal: the session completed successfully.
    Done,
    /// Terminal: a timeout expired before the session completed.
    Timeout,
}

impl Status {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn finished(self) -> bool {
        matches!(self, Self::Cancelled | Self::Done | Self::Timeout)
    }

    /// The wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::Connected => "CONNECTED",
            Self::Communicating => "COMMUNICATING",
            Self::Cancelled => "CANCELLED",
            Self::Done => "DONE",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable session error identifiers.
///
/// These names are part of the wire format; they never change and are
/// never replaced by enum ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No protocol version in common with the client.
    #[serde(rename = "protocolVersionNotSupported")]
    ProtocolVersionNotSupported,
    /// Error in HTTP communication.
    #[serde(rename = "transport")]
    Transport,
    /// Invalid requestor JWT.
    #[serde(rename = "invalidJwt")]
    InvalidJwt,
    /// Unknown session type.
    #[serde(rename = "unknownAction")]
    UnknownAction,
    /// No session under the presented token.
    #[serde(rename = "unknownSession")]
    UnknownSession,
    /// The operation is not legal in the session's current status.
    #[serde(rename = "unexpectedRequest")]
    UnexpectedRequest,
    /// Cryptographic failure while processing the client's response.
    #[serde(rename = "crypto")]
    Crypto,
    /// The client's response was rejected by verification.
    #[serde(rename = "rejected")]
    Rejected,
    /// (De)serialization of a message failed.
    #[serde(rename = "serialization")]
    Serialization,
    /// Error in the keyshare protocol.
    #[serde(rename = "keyshare")]
    Keyshare,
    /// The keyshare server has blocked the user.
    #[serde(rename = "keyshareBlocked")]
    KeyshareBlocked,
    /// Error reported by a remote API server.
    #[serde(rename = "api")]
    Api,
    /// Unexpected or malformed response from a remote server. Unrecognized
    /// remote error names are reclassified to this kind.
    #[serde(rename = "serverResponse")]
    ServerResponse,
}

impl ErrorKind {
    /// The stable wire name of this error kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ProtocolVersionNotSupported => "protocolVersionNotSupported",
            Self::Transport => "transport",
            Self::InvalidJwt => "invalidJwt",
            Self::UnknownAction => "unknownAction",
            Self::UnknownSession => "unknownSession",
            Self::UnexpectedRequest => "unexpectedRequest",
            Self::Crypto => "crypto",
            Self::Rejected => "rejected",
            Self::Serialization => "serialization",
            Self::Keyshare => "keyshare",
            Self::KeyshareBlocked => "keyshareBlocked",
            Self::Api => "api",
            Self::ServerResponse => "serverResponse",
        }
    }

    /// A short human-readable description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::ProtocolVersionNotSupported => "Protocol version not supported",
            Self::Transport => "HTTP communication error",
            Self::InvalidJwt => "Invalid JWT",
            Self::UnknownAction => "Unknown session type",
            Self::UnknownSession => "Unknown or expired session",
            Self::UnexpectedRequest => "Unexpected request in this state",
            Self::Crypto => "Cryptographic error",
            Self::Rejected => "Response rejected",
            Self::Serialization => "(De)serialization error",
            Self::Keyshare => "Keyshare protocol error",
            Self::KeyshareBlocked => "Blocked by keyshare server",
            Self::Api => "API error",
            Self::ServerResponse => "Unexpected server response",
        }
    }

    /// The HTTP status class this kind maps to: 4xx for client-side
    /// mistakes, 5xx for internal faults.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::ProtocolVersionNotSupported
            | Self::InvalidJwt
            | Self::UnknownAction
            | Self::UnexpectedRequest
            | Self::Crypto
            | Self::Rejected
            | Self::Keyshare
            | Self::KeyshareBlocked => 400,
            Self::Api => 403,
            Self::UnknownSession => 404,
            Self::Transport | Self::Serialization | Self::ServerResponse => 500,
        }
    }

    /// Resolves a wire name back to a kind. Unrecognized names coming from
    /// remote servers are reclassified as [`ErrorKind::ServerResponse`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "protocolVersionNotSupported" => Self::ProtocolVersionNotSupported,
            "transport" => Self::Transport,
            "invalidJwt" => Self::InvalidJwt,
            "unknownAction" => Self::UnknownAction,
            "unknownSession" => Self::UnknownSession,
            "unexpectedRequest" => Self::UnexpectedRequest,
            "crypto" => Self::Crypto,
            "rejected" => Self::Rejected,
            "serialization" => Self::Serialization,
            "keyshare" => Self::Keyshare,
            "keyshareBlocked" => Self::KeyshareBlocked,
            "api" => Self::Api,
            _ => Self::ServerResponse,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A protocol-level session failure.
///
/// Carries the stable error kind, the HTTP status it surfaces with, and
/// optionally a wrapped cause or the error envelope a remote API returned.
#[derive(Debug, Clone)]
pub struct SessionError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// HTTP status the failure surfaces with.
    pub status: u16,
    /// Detail message, if any.
    pub message: Option<String>,
    /// Error envelope received from a remote API, if any.
    pub remote: Option<ApiError>,
}

impl SessionError {
    /// Creates an error of the given kind with its default HTTP status.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            status: kind.http_status(),
            message: None,
            remote: None,
        }
    }

    /// Attaches a detail message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Overrides the HTTP status the failure surfaces with.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Attaches a remote API error envelope, reclassifying the kind from
    /// the remote error name.
    #[must_use]
    pub fn from_remote(remote: ApiError) -> Self {
        let kind = ErrorKind::from_name(&remote.error);
        Self {
            kind,
            status: remote.status,
            message: Some(remote.message.clone()),
            remote: Some(remote),
        }
    }

    /// Renders the wire envelope for this failure.
    #[must_use]
    pub fn to_envelope(&self) -> ApiError {
        ApiError {
            status: self.status,
            error: self.kind.name().to_owned(),
            description: self.kind.description().to_owned(),
            message: self.message.clone().unwrap_or_default(),
            stacktrace: None,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.kind),
            None => f.write_str(self.kind.name()),
        }
    }
}

impl std::error::Error for SessionError {}

/// The JSON error envelope returned on failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// HTTP status code.
    pub status: u16,
    /// Stable error name, see [`ErrorKind`].
    pub error: String,
    /// Short description of the error kind.
    pub description: String,
    /// Detail message.
    #[serde(default)]
    pub message: String,
    /// Optional stack trace, only populated outside production.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
}

/// The payload encoded into a session QR, handing the client the session
/// URL and the server's supported protocol range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qr {
    /// URL of the session, the only capability the client needs.
    #[serde(rename = "u")]
    pub url: String,
    /// Session type.
    #[serde(rename = "irmaqr")]
    pub action: Action,
    /// Lowest protocol version the server supports.
    #[serde(rename = "v")]
    pub version: ProtocolVersion,
    /// Highest protocol version the server supports.
    #[serde(rename = "vmax")]
    pub max_version: ProtocolVersion,
}

/// The first message of the protocol: what the client receives when it
/// GETs the session URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// The signed requestor statement the client verifies and shows to the
    /// user.
    pub jwt: String,
    /// The nonce the client must bind its proofs to.
    pub nonce: Bignum,
    /// The context the client must bind its proofs to.
    pub context: Bignum,
    /// For issuance sessions: public key counter per issuer.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<IssuerIdentifier, u32>,
}

/// The proof payload the client POSTs as its response.
///
/// Its internal structure belongs to the cryptographic library; the
/// session runtime treats it as opaque JSON and hands it to the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProofMessage(pub serde_json::Value);

impl ProofMessage {
    /// Whether the payload carries no content at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }
}

/// A single disclosed attribute in a session result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosedAttribute {
    /// The attribute that was disclosed.
    pub id: AttributeTypeIdentifier,
    /// Its value.
    pub value: String,
}

/// The result of a session as surfaced to the requestor.
///
/// The result is partial while the session runs and frozen once the
/// status is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    /// The session token.
    pub token: SessionToken,
    /// The session type.
    #[serde(rename = "type")]
    pub action: Action,
    /// Current session status.
    pub status: Status,
    /// Attributes disclosed during the session.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disclosed: Vec<DisclosedAttribute>,
    /// The attribute-based signature, for signing sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<serde_json::Value>,
    /// The error that ended the session, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<ErrorKind>,
}

impl SessionResult {
    /// An empty result for a freshly created session.
    #[must_use]
    pub fn new(token: SessionToken, action: Action) -> Self {
        Self {
            token,
            action,
            status: Status::Initialized,
            disclosed: Vec::new(),
            signature: None,
            err: None,
        }
    }
}

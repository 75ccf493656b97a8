//! # irma-core
//!
//! Protocol value types and wire formats for the IRMA attribute-based
//! credential protocol, shared between the server runtime and anything
//! that needs to speak its JSON surface.
//!
//! This crate is deliberately free of I/O: it contains identifiers,
//! protocol versions, session requests, the messages exchanged with the
//! IRMA client, and the requestor JWT codec. The server runtime lives in
//! `irma-daemon`.
//!
//! ## Example
//!
//! ```rust
//! use irma_core::identifiers::AttributeTypeIdentifier;
//! use irma_core::requests::{AttributeDisjunction, DisclosureRequest, SessionRequest};
//!
//! let request = SessionRequest::Disclose(DisclosureRequest {
//!     base: Default::default(),
//!     content: vec![AttributeDisjunction {
//!         label: "Age limit".into(),
//!         attributes: vec![AttributeTypeIdentifier::new(
//!             "irma-demo.MijnOverheid.ageLower.over18",
//!         )],
//!     }],
//! });
//! assert_eq!(request.action().as_str(), "disclosing");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bignum;
pub mod identifiers;
pub mod jwt;
pub mod messages;
pub mod requests;
pub mod version;

pub use bignum::Bignum;
pub use identifiers::{
    AttributePattern, AttributeTypeIdentifier, CredentialTypeIdentifier, IssuerIdentifier,
    SchemeManagerIdentifier, SessionToken,
};
pub use messages::{
    Action, ApiError, DisclosedAttribute, ErrorKind, ProofMessage, Qr, SessionError, SessionInfo,
    SessionResult, Status,
};
pub use requests::SessionRequest;
pub use version::ProtocolVersion;

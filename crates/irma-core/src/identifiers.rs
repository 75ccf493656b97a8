//! Identifiers for schemes, issuers, credential types and attributes, plus
//! session tokens.
//!
//! IRMA identifiers are dotted strings growing one segment per level:
//! `irma-demo` names a scheme, `irma-demo.MijnOverheid` an issuer,
//! `irma-demo.MijnOverheid.ageLower` a credential type, and
//! `irma-demo.MijnOverheid.ageLower.over18` an attribute. Equality is
//! order-preserving string equality.

use std::fmt;

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Number of characters in a session token.
pub const TOKEN_LENGTH: usize = 20;

/// Alphabet session tokens are drawn from.
pub const TOKEN_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

macro_rules! dotted_identifier {
    ($(#[$doc:meta])* $name:ident, $segments:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw dotted string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier has the expected number of dotted
            /// segments, all non-empty.
            #[must_use]
            pub fn is_well_formed(&self) -> bool {
                let parts: Vec<&str> = self.0.split('.').collect();
                parts.len() == $segments && parts.iter().all(|p| !p.is_empty())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

dotted_identifier!(
    /// Identifies a scheme manager, e.g. `irma-demo`.
    SchemeManagerIdentifier,
    1
);

dotted_identifier!(
    /// Identifies an issuer within a scheme, e.g. `irma-demo.MijnOverheid`.
    IssuerIdentifier,
    2
);

dotted_identifier!(
    /// Identifies a credential type, e.g. `irma-demo.MijnOverheid.ageLower`.
    CredentialTypeIdentifier,
    3
);

dotted_identifier!(
    /// Identifies an attribute within a credential type, e.g.
    /// `irma-demo.MijnOverheid.ageLower.over18`.
    AttributeTypeIdentifier,
    4
);

impl IssuerIdentifier {
    /// The scheme this issuer belongs to.
    #[must_use]
    pub fn scheme(&self) -> SchemeManagerIdentifier {
        SchemeManagerIdentifier::new(head(&self.0, 1))
    }
}

impl CredentialTypeIdentifier {
    /// The issuer of this credential type.
    #[must_use]
    pub fn issuer(&self) -> IssuerIdentifier {
        IssuerIdentifier::new(head(&self.0, 2))
    }

    /// Appends an attribute name, producing an attribute identifier.
    #[must_use]
    pub fn attribute(&self, name: &str) -> AttributeTypeIdentifier {
        AttributeTypeIdentifier::new(format!("{}.{name}", self.0))
    }
}

impl AttributeTypeIdentifier {
    /// The credential type this attribute belongs to.
    #[must_use]
    pub fn credential_type(&self) -> CredentialTypeIdentifier {
        CredentialTypeIdentifier::new(head(&self.0, 3))
    }
}

/// First `n` dotted segments of `s`.
fn head(s: &str, n: usize) -> String {
    s.split('.').take(n).collect::<Vec<_>>().join(".")
}

/// An attribute pattern as used in requestor permissions.
///
/// A pattern is either a full attribute identifier, a prefix ending in
/// `.*` matching every attribute below it, or the bare `*` matching
/// everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributePattern(String);

impl AttributePattern {
    /// Wraps a raw pattern string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the pattern as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this pattern matches the given attribute.
    #[must_use]
    pub fn matches(&self, attribute: &AttributeTypeIdentifier) -> bool {
        if self.0 == "*" {
            return true;
        }
        if let Some(prefix) = self.0.strip_suffix(".*") {
            return attribute.as_str().starts_with(prefix)
                && attribute.as_str()[prefix.len()..].starts_with('.');
        }
        self.0 == attribute.as_str()
    }
}

impl fmt::Display for AttributePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttributePattern {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// The capability identifying a session to both the client and the
/// requestor.
///
/// Tokens are 20 characters drawn uniformly from `[A-Za-z0-9]` using the
/// operating system RNG.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generates a fresh random token.
    ///
    /// Uniqueness within a store is the caller's concern; the store insert
    /// rejects duplicates and the caller retries.
    #[must_use]
    pub fn random() -> Self {
        let mut rng = OsRng;
        let token: String = (0..TOKEN_LENGTH)
            .map(|_| char::from(TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())]))
            .collect();
        Self(token)
    }

    /// Wraps an existing token string without validating it.
    ///
    /// Use [`parse`](Self::parse) for tokens received over the wire.
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Parses a token received over the wire.
    ///
    /// Returns `None` when the string is not exactly [`TOKEN_LENGTH`]
    /// characters from [`TOKEN_ALPHABET`]. Malformed tokens are
    /// indistinguishable from unknown ones to callers.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == TOKEN_LENGTH && s.bytes().all(|b| TOKEN_ALPHABET.contains(&b)) {
            Some(Self(s.to_owned()))
        } else {
            None
        }
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn identifier_parents() {
        let attr = AttributeTypeIdentifier::new("irma-demo.MijnOverheid.ageLower.over18");
        assert!(attr.is_well_formed());
        let cred = attr.credential_type();
        assert_eq!(cred.as_str(), "irma-demo.MijnOverheid.ageLower");
        assert_eq!(cred.issuer().as_str(), "irma-demo.MijnOverheid");
        assert_eq!(cred.issuer().scheme().as_str(), "irma-demo");
    }

    #[test]
    fn identifier_well_formedness() {
        assert!(!AttributeTypeIdentifier::new("irma-demo.MijnOverheid.ageLower").is_well_formed());
        assert!(!AttributeTypeIdentifier::new("a.b..d").is_well_formed());
        assert!(CredentialTypeIdentifier::new("irma-demo.MijnOverheid.ageLower").is_well_formed());
    }

    #[test]
    fn credential_attribute_join() {
        let cred = CredentialTypeIdentifier::new("irma-demo.MijnOverheid.ageLower");
        assert_eq!(
            cred.attribute("over18").as_str(),
            "irma-demo.MijnOverheid.ageLower.over18"
        );
    }

    #[test]
    fn pattern_matching() {
        let attr = AttributeTypeIdentifier::new("irma-demo.MijnOverheid.ageLower.over18");

        assert!(AttributePattern::from("*").matches(&attr));
        assert!(AttributePattern::from("irma-demo.*").matches(&attr));
        assert!(AttributePattern::from("irma-demo.MijnOverheid.*").matches(&attr));
        assert!(AttributePattern::from("irma-demo.MijnOverheid.ageLower.over18").matches(&attr));

        assert!(!AttributePattern::from("pbdf.*").matches(&attr));
        assert!(!AttributePattern::from("irma-demo.MijnOverheid.ageLower.over21").matches(&attr));
        // A prefix pattern must match at a segment boundary.
        assert!(!AttributePattern::from("irma-demo.Mijn.*").matches(&attr));
    }

    #[test]
    fn token_shape() {
        let token = SessionToken::random();
        assert_eq!(token.as_str().len(), TOKEN_LENGTH);
        assert!(token.as_str().bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
    }

    #[test]
    fn token_parse_rejects_malformed() {
        assert!(SessionToken::parse("short").is_none());
        assert!(SessionToken::parse("someth!ng0123456789x").is_none());
        assert!(SessionToken::parse(&"a".repeat(TOKEN_LENGTH)).is_some());
    }

    #[test]
    fn tokens_do_not_collide_casually() {
        let tokens: HashSet<String> = (0..1000)
            .map(|_| SessionToken::random().as_str().to_owned())
            .collect();
        assert_eq!(tokens.len(), 1000);
    }
}

//! Protocol version tuples and negotiation.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// An IRMA protocol version, e.g. `2.4`.
///
/// Versions order lexicographically on `(major, minor)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    major: u8,
    minor: u8,
}

/// Error parsing a protocol version string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid protocol version: {0:?}")]
pub struct ParseVersionError(String);

impl ProtocolVersion {
    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Major component.
    #[must_use]
    pub const fn major(self) -> u8 {
        self.major
    }

    /// Minor component.
    #[must_use]
    pub const fn minor(self) -> u8 {
        self.minor
    }

    /// Negotiates a version between a server range and a client range.
    ///
    /// The result is `min(server_max, client_max)` provided that it is at
    /// least `max(server_min, client_min)`; otherwise the ranges do not
    /// overlap and there is no version both sides speak.
    #[must_use]
    pub fn negotiate(
        server_min: Self,
        server_max: Self,
        client_min: Self,
        client_max: Self,
    ) -> Option<Self> {
        let high = server_max.min(client_max);
        let low = server_min.max(client_min);
        (high >= low).then_some(high)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ProtocolVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_owned());
        let (major, minor) = s.split_once('.').ok_or_else(err)?;
        Ok(Self {
            major: major.parse().map_err(|_| err())?,
            minor: minor.parse().map_err(|_| err())?,
        })
    }
}

// On the wire versions are strings, e.g. "v": "2.4" in the QR payload.
impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

//! Arbitrary-size unsigned integers encoded as decimal strings.
//!
//! The protocol exchanges a handful of large integers (session nonces and
//! contexts) as decimal strings in JSON. Nothing in this crate does
//! arithmetic on them beyond the base conversion, so a thin magnitude
//! wrapper suffices; the cryptographic library consuming these values is
//! an external collaborator.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// An unsigned big integer, stored as a big-endian magnitude with no
/// leading zero bytes. Zero is the empty magnitude.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Bignum(Vec<u8>);

/// Error parsing a decimal string into a [`Bignum`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid decimal integer: {0:?}")]
pub struct ParseBignumError(String);

impl Bignum {
    /// The constant 1, the fixed session context.
    #[must_use]
    pub fn one() -> Self {
        Self(vec![1])
    }

    /// Constructs a value from big-endian bytes, trimming leading zeros.
    #[must_use]
    pub fn from_bytes_be(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        Self(bytes[start..].to_vec())
    }

    /// Generates a uniformly random value of at most `bits` bits using the
    /// operating system RNG.
    #[must_use]
    pub fn random(bits: usize) -> Self {
        let mut bytes = vec![0u8; bits.div_ceil(8)];
        OsRng.fill_bytes(&mut bytes);
        if bits % 8 != 0 {
            bytes[0] &= (1 << (bits % 8)) - 1;
        }
        Self::from_bytes_be(&bytes)
    }

    /// Number of significant bits.
    #[must_use]
    pub fn bit_len(&self) -> usize {
        match self.0.first() {
            None => 0,
            Some(&top) => (self.0.len() - 1) * 8 + (8 - top.leading_zeros() as usize),
        }
    }

    /// The big-endian magnitude, without leading zeros.
    #[must_use]
    pub fn to_bytes_be(&self) -> &[u8] {
        &self.0
    }

    /// Renders the value as a decimal string.
    #[must_use]
    pub fn to_decimal(&self) -> String {
        if self.0.is_empty() {
            return "0".to_owned();
        }
        let mut digits = Vec::new();
        let mut num = self.0.clone();
        while !num.is_empty() {
            // One long division of the magnitude by 10.
            let mut rem: u32 = 0;
            let mut quotient = Vec::with_capacity(num.len());
            for &byte in &num {
                let cur = rem * 256 + u32::from(byte);
                quotient.push(u8::try_from(cur / 10).expect("quotient digit fits in a byte"));
                rem = cur % 10;
            }
            let start = quotient
                .iter()
                .position(|&b| b != 0)
                .unwrap_or(quotient.len());
            num = quotient[start..].to_vec();
            digits.push(b'0' + u8::try_from(rem).expect("remainder below 10"));
        }
        digits.reverse();
        String::from_utf8(digits).expect("decimal digits are ASCII")
    }

    /// Parses a decimal string.
    ///
    /// # Errors
    ///
    /// Returns [`ParseBignumError`] when the string is empty or contains a
    /// non-digit character.
    pub fn from_decimal(s: &str) -> Result<Self, ParseBignumError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseBignumError(s.to_owned()));
        }
        let mut bytes: Vec<u8> = Vec::new();
        for digit in s.bytes().map(|b| u32::from(b - b'0')) {
            // bytes := bytes * 10 + digit
            let mut carry = digit;
            for byte in bytes.iter_mut().rev() {
                let cur = u32::from(*byte) * 10 + carry;
                *byte = (cur & 0xff) as u8;
                carry = cur >> 8;
            }
            while carry > 0 {
                bytes.insert(0, (carry & 0xff) as u8);
                carry >>= 8;
            }
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Bignum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bignum({})", self.to_decimal())
    }
}

impl fmt::Display for Bignum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal())
    }
}

impl Serialize for Bignum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_decimal())
    }
}

impl<'de> Deserialize<'de> for Bignum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_decimal(&s).map_err(D::Error::custom)
    }
}

//! Digest: a BLAKE3 content digest truncated to 128 bits (32 hex chars).
//!
//! Equal bytes always produce an equal digest, so the digest doubles as the
//! deduplication key for the whole store. 128 bits of BLAKE3 keeps the
//! collision risk negligible while staying short enough to paste into a URL.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of hex characters in a rendered digest.
pub const DIGEST_HEX_LEN: usize = 32;

/// A content digest - 128 bits (16 bytes, 32 lowercase hex chars) of BLAKE3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

/// Errors that can occur when parsing a digest supplied from outside.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("invalid digest length: expected 32 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in digest")]
    InvalidHex,
}

impl Digest {
    /// Hash data and return its digest.
    pub fn from_data(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Self(hex::encode(&hash.as_bytes()[..DIGEST_HEX_LEN / 2]))
    }

    /// Create from an existing digest string (validates format).
    pub fn from_str_checked(s: &str) -> Result<Self, DigestError> {
        if s.len() != DIGEST_HEX_LEN {
            return Err(DigestError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::InvalidHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// First 2 characters, used for directory sharding.
    pub fn prefix(&self) -> &str {
        &self.0[0..2]
    }

    /// Everything after the prefix.
    pub fn remainder(&self) -> &str {
        &self.0[2..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str_checked(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

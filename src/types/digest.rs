// ABOUTME: Content digest type for content-addressable descriptors.
// ABOUTME: Validates algorithm:hex strings and computes sha256 digests of payloads.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseDigestError {
    #[error("digest cannot be empty")]
    Empty,

    #[error("digest {0:?} is missing the algorithm separator")]
    MissingAlgorithm(String),

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid {algorithm} digest length: expected {expected} hex characters, got {actual}")]
    InvalidLength {
        algorithm: String,
        expected: usize,
        actual: usize,
    },

    #[error("digest contains non-hex character: '{0}'")]
    InvalidChar(char),
}

/// A validated content digest such as `sha256:<64 hex chars>`.
///
/// Two descriptors with equal digests reference the same content, regardless
/// of which repository they were resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    pub fn parse(input: &str) -> Result<Self, ParseDigestError> {
        if input.is_empty() {
            return Err(ParseDigestError::Empty);
        }

        let (algorithm, encoded) = input
            .split_once(':')
            .ok_or_else(|| ParseDigestError::MissingAlgorithm(input.to_string()))?;

        let expected = match algorithm {
            "sha256" => 64,
            "sha384" => 96,
            "sha512" => 128,
            other => return Err(ParseDigestError::UnsupportedAlgorithm(other.to_string())),
        };

        if encoded.len() != expected {
            return Err(ParseDigestError::InvalidLength {
                algorithm: algorithm.to_string(),
                expected,
                actual: encoded.len(),
            });
        }

        if let Some(c) = encoded
            .chars()
            .find(|c| !matches!(c, '0'..='9' | 'a'..='f'))
        {
            return Err(ParseDigestError::InvalidChar(c));
        }

        Ok(Self(input.to_string()))
    }

    /// Compute the sha256 digest of a payload.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(format!("sha256:{}", hex::encode(Sha256::digest(data))))
    }

    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or_default()
    }

    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map(|(_, e)| e).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Incremental sha256 digester used while streaming content.
#[derive(Default)]
pub struct Digester {
    hasher: Sha256,
    written: u64,
}

impl Digester {
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.written += chunk.len() as u64;
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(self) -> Digest {
        Digest(format!("sha256:{}", hex::encode(self.hasher.finalize())))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = ParseDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = ParseDigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.0
    }
}

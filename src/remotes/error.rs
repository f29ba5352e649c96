// ABOUTME: Error type returned by resolver, fetcher, and pusher capabilities.
// ABOUTME: "Already exists" is a success-equivalent signal for idempotent writes.

use crate::types::{Digest, ParseImageRefError};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Content is already present at the destination.
    #[error("content {0} already exists")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The registry or capability does not support the requested operation.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("invalid reference: {0}")]
    InvalidReference(#[from] ParseImageRefError),

    #[error("unexpected size for {digest}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        digest: Digest,
        expected: u64,
        actual: u64,
    },

    #[error("unexpected digest: expected {expected}, got {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },

    #[error("operation canceled")]
    Canceled,

    #[error("registry error: {0}")]
    Registry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, RemoteError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

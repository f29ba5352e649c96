// ABOUTME: Registry client error types with SNAFU context selectors.
// ABOUTME: Converted into RemoteError at the Resolver/Fetcher/Pusher seam.

use reqwest::StatusCode;
use snafu::Snafu;

use crate::remotes::RemoteError;
use crate::types::Digest;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RegistryError {
    #[snafu(display("failed to build HTTP client: {source}"))]
    BuildClient { source: reqwest::Error },

    #[snafu(display("request to {url} failed: {source}"))]
    Request { url: String, source: reqwest::Error },

    #[snafu(display("{method} {url} failed with status code {status}"))]
    UnexpectedStatus {
        method: reqwest::Method,
        url: String,
        status: StatusCode,
    },

    #[snafu(display("{reference} not found"))]
    NotFound { reference: String },

    #[snafu(display("{object}"))]
    AlreadyExists { object: String },

    #[snafu(display("authentication challenge from {url} has no realm"))]
    MissingRealm { url: String },

    #[snafu(display("invalid token realm {realm}"))]
    InvalidRealm { realm: String },

    #[snafu(display("token request to {realm} failed with status code {status}"))]
    TokenRequest { realm: String, status: StatusCode },

    #[snafu(display("token response from {realm} carried no token"))]
    MissingToken { realm: String },

    #[snafu(display("upload session for {digest} returned no location"))]
    MissingLocation { digest: Digest },

    #[snafu(display("invalid upload location {location}"))]
    InvalidLocation { location: String },

    #[snafu(display("upload of {digest} ended before it was committed"))]
    UploadAborted { digest: Digest },

    #[snafu(display(
        "possible attempt to access an insecure registry without skipping TLS verification detected: {source}"
    ))]
    InsecureHint { source: Box<RegistryError> },
}

impl RegistryError {
    /// HTTP status behind this error, when the registry answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RegistryError::UnexpectedStatus { status, .. }
            | RegistryError::TokenRequest { status, .. } => Some(*status),
            RegistryError::NotFound { .. } => Some(StatusCode::NOT_FOUND),
            RegistryError::InsecureHint { source } => source.status(),
            _ => None,
        }
    }
}

impl From<RegistryError> for RemoteError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound { reference } => RemoteError::NotFound(reference),
            RegistryError::AlreadyExists { object } => RemoteError::AlreadyExists(object),
            other => RemoteError::Registry(other.to_string()),
        }
    }
}

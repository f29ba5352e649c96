// ABOUTME: Application-wide error types for cnab-oci.
// ABOUTME: Uses thiserror for ergonomic error handling.

use crate::bundle::BundleError;
use crate::image_client::ImageClientError;
use crate::registry::RegistryError;
use crate::remotes::fixup::FixupError;
use crate::types::{ParseImageRefError, ParsePlatformError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid target reference: {0}")]
    InvalidTarget(#[from] ParseImageRefError),

    #[error("invalid platform: {0}")]
    InvalidPlatform(#[from] ParsePlatformError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Fixup(#[from] FixupError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    ImageClient(#[from] ImageClientError),

    #[error("interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

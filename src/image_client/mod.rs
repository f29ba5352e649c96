// ABOUTME: Local image store capability used to push images that only exist locally.
// ABOUTME: Defines the ImageClient trait and its errors; the Docker implementation lives in docker.rs.

mod docker;

pub use docker::DockerImageClient;

use crate::types::ImageRef;
use async_trait::async_trait;

/// Tag and push images held by a local daemon.
#[async_trait]
pub trait ImageClient: Send + Sync {
    /// Tag `source` (name, reference or image id) as `target`.
    async fn tag(&self, source: &str, target: &ImageRef) -> Result<(), ImageClientError>;

    /// Push `target` to its registry, consuming the daemon's progress stream.
    async fn push(&self, target: &ImageRef) -> Result<(), ImageClientError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ImageClientError {
    #[error("failed to connect to the local image store: {0}")]
    Connection(String),

    #[error("image {0} not found in the local image store")]
    NotFound(String),

    #[error("failed to tag {source_image} as {target}: {message}")]
    Tag {
        source_image: String,
        target: String,
        message: String,
    },

    #[error("failed to push {target}: {message}")]
    Push { target: String, message: String },
}

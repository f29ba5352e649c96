// ABOUTME: Bollard-based local image client.
// ABOUTME: Tags and pushes images through the Docker-compatible API of the local daemon.

use super::{ImageClient, ImageClientError};
use crate::config::Credentials;
use crate::types::{DEFAULT_TAG, ImageRef};
use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::query_parameters::{PushImageOptions, TagImageOptions};
use futures::StreamExt;
use std::collections::HashMap;

fn map_tag_error(e: bollard::errors::Error, source: &str, target: &ImageRef) -> ImageClientError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => ImageClientError::NotFound(source.to_string()),
        _ => ImageClientError::Tag {
            source_image: source.to_string(),
            target: target.to_string(),
            message: e.to_string(),
        },
    }
}

pub struct DockerImageClient {
    client: Docker,
    credentials: HashMap<String, Credentials>,
}

impl DockerImageClient {
    pub fn new(client: Docker) -> Self {
        Self {
            client,
            credentials: HashMap::new(),
        }
    }

    /// Connect to the local daemon using `DOCKER_HOST` or the platform default socket.
    pub fn connect_local() -> Result<Self, ImageClientError> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| ImageClientError::Connection(e.to_string()))?;
        Ok(Self::new(client))
    }

    /// Credentials sent with pushes, keyed by registry host.
    pub fn with_credentials(mut self, credentials: HashMap<String, Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    fn credentials_for(&self, domain: &str) -> Option<DockerCredentials> {
        self.credentials.get(domain).map(|c| DockerCredentials {
            username: Some(c.username.clone()),
            password: Some(c.password.clone()),
            serveraddress: Some(domain.to_string()),
            ..Default::default()
        })
    }
}

#[async_trait]
impl ImageClient for DockerImageClient {
    async fn tag(&self, source: &str, target: &ImageRef) -> Result<(), ImageClientError> {
        let opts = TagImageOptions {
            repo: Some(target.name()),
            tag: Some(target.tag().unwrap_or(DEFAULT_TAG).to_string()),
            ..Default::default()
        };
        self.client
            .tag_image(source, Some(opts))
            .await
            .map_err(|e| map_tag_error(e, source, target))
    }

    async fn push(&self, target: &ImageRef) -> Result<(), ImageClientError> {
        let opts = PushImageOptions {
            tag: Some(target.tag().unwrap_or(DEFAULT_TAG).to_string()),
            ..Default::default()
        };
        let credentials = self.credentials_for(target.domain());

        // Push returns a stream of progress updates - consume it
        let mut stream = self
            .client
            .push_image(&target.name(), Some(opts), credentials);
        while let Some(update) = stream.next().await {
            let info = update.map_err(|e| ImageClientError::Push {
                target: target.to_string(),
                message: e.to_string(),
            })?;
            if let Some(status) = info.status {
                tracing::debug!(image = %target, "{status}");
            }
        }
        Ok(())
    }
}

// ABOUTME: OCI distribution API client implementing the Resolver capability.
// ABOUTME: Resolves references and hands out registry-backed fetchers and pushers.

mod auth;
mod client;
mod content;
mod error;

pub use client::{DOCKER_HUB_REGISTRY_HOST, Transport};
pub use error::RegistryError;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Credentials, Settings};
use crate::remotes::{Fetcher, Pusher, RemoteError, Resolver};
use crate::types::{DEFAULT_TAG, Descriptor, Digest, ImageRef, media_types};
use auth::Scope;
use client::RegistryClient;
use content::{RegistryFetcher, RegistryPusher, check_status};

pub(crate) const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

fn manifest_accept() -> String {
    media_types::MANIFEST_ACCEPT.join(", ")
}

/// Builder for [`RegistryResolver`].
#[derive(Debug, Clone)]
pub struct RegistryResolverBuilder {
    insecure_registries: Vec<String>,
    credentials: HashMap<String, Credentials>,
    timeout: Duration,
}

impl RegistryResolverBuilder {
    /// Registries reached without TLS verification or over plain HTTP.
    pub fn insecure_registries(mut self, registries: impl IntoIterator<Item = String>) -> Self {
        self.insecure_registries.extend(registries);
        self
    }

    /// Credentials keyed by registry host.
    pub fn credentials(mut self, credentials: HashMap<String, Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the resolver, probing each insecure registry for TLS support.
    pub async fn build(self) -> Result<RegistryResolver, RegistryError> {
        let mut client = RegistryClient::new(self.timeout, self.credentials)?;
        client.probe_insecure(&self.insecure_registries).await;
        Ok(RegistryResolver {
            client: Arc::new(client),
        })
    }
}

/// Resolver backed by OCI distribution registries.
#[derive(Clone)]
pub struct RegistryResolver {
    client: Arc<RegistryClient>,
}

impl RegistryResolver {
    pub fn builder() -> RegistryResolverBuilder {
        RegistryResolverBuilder {
            insecure_registries: Vec::new(),
            credentials: HashMap::new(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Builder seeded from the settings file.
    pub fn from_settings(
        settings: &Settings,
    ) -> crate::error::Result<RegistryResolverBuilder> {
        Ok(Self::builder()
            .insecure_registries(settings.insecure_registries.iter().cloned())
            .credentials(settings.resolve_credentials()?)
            .timeout(settings.timeout))
    }

    pub fn transport(&self, domain: &str) -> Transport {
        self.client.transport(domain)
    }

    async fn resolve_ref(&self, image: &ImageRef) -> Result<Descriptor, RegistryError> {
        let domain = image.domain();
        let object = match (image.digest(), image.tag()) {
            (Some(digest), _) => digest.to_string(),
            (None, Some(tag)) => tag.to_string(),
            (None, None) => DEFAULT_TAG.to_string(),
        };
        let url = format!(
            "{}/{}/manifests/{object}",
            self.client.base_url(domain),
            image.path()
        );
        let scope = Scope::pull(image.path());
        let accept = manifest_accept();
        let reference = image.to_string();

        let response = self
            .client
            .send(domain, &scope, Method::HEAD, &url, |r| r.header(ACCEPT, &accept))
            .await?;
        if response.status().is_success()
            && let Some(descriptor) = descriptor_from_headers(&response, image.digest())
        {
            return Ok(descriptor);
        }
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound { reference });
        }

        // Some registries omit the digest header or reject HEAD; fetch and hash instead.
        tracing::debug!(reference = %reference, status = %response.status(), "falling back to GET for resolve");
        let response = self
            .client
            .send(domain, &scope, Method::GET, &url, |r| r.header(ACCEPT, &accept))
            .await?;
        let response = check_status(response, Method::GET, &url, &reference)?;
        let media_type = content_type(&response);
        let body = response
            .bytes()
            .await
            .map_err(|source| RegistryError::Request {
                url: url.clone(),
                source,
            })?;
        Ok(Descriptor::new(
            media_type,
            Digest::from_bytes(&body),
            body.len() as u64,
        ))
    }
}

fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .unwrap_or_default()
}

/// Descriptor from a manifest HEAD response, when the registry sent enough to build one.
fn descriptor_from_headers(response: &Response, pinned: Option<&Digest>) -> Option<Descriptor> {
    let headers = response.headers();
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())?;
    let digest = headers
        .get(DOCKER_CONTENT_DIGEST)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Digest::parse(v).ok())
        .or_else(|| pinned.cloned())?;
    Some(Descriptor::new(content_type(response), digest, size))
}

#[async_trait]
impl Resolver for RegistryResolver {
    async fn resolve(&self, reference: &str) -> Result<(String, Descriptor), RemoteError> {
        let image = ImageRef::parse(reference)?;
        match self.resolve_ref(&image).await {
            Ok(descriptor) => {
                tracing::debug!(reference = %image, digest = %descriptor.digest, "resolved");
                Ok((image.to_string(), descriptor))
            }
            Err(e)
                if e.status() == Some(StatusCode::BAD_REQUEST)
                    && self.client.transport(image.domain()) != Transport::HttpsSkipVerify =>
            {
                Err(RegistryError::InsecureHint {
                    source: Box::new(e),
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fetcher(&self, reference: &str) -> Result<Arc<dyn Fetcher>, RemoteError> {
        let image = ImageRef::parse(reference)?;
        Ok(Arc::new(RegistryFetcher::new(self.client.clone(), image)))
    }

    async fn pusher(&self, reference: &str) -> Result<Arc<dyn Pusher>, RemoteError> {
        let image = ImageRef::parse(reference)?;
        Ok(Arc::new(RegistryPusher::new(self.client.clone(), image)))
    }
}

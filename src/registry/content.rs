// ABOUTME: Fetcher and Pusher over the OCI distribution API.
// ABOUTME: Streams blobs in and out, buffers manifests, and mounts blobs across repositories.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Body, Method, Response, StatusCode};
use snafu::OptionExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::client::RegistryClient;
use super::error::{
    AlreadyExistsSnafu, InvalidLocationSnafu, MissingLocationSnafu, NotFoundSnafu, RegistryError,
    UnexpectedStatusSnafu,
};
use super::DOCKER_CONTENT_DIGEST;
use super::auth::Scope;
use crate::remotes::{ContentStream, ContentWriter, Fetcher, MAX_MANIFEST_SIZE, Pusher, RemoteError};
use crate::types::{Descriptor, Digest, ImageRef};

/// Chunks buffered between the copier and an in-flight blob upload.
const UPLOAD_CHANNEL_CAPACITY: usize = 8;

pub(crate) fn check_status(
    response: Response,
    method: Method,
    url: &str,
    reference: &str,
) -> Result<Response, RegistryError> {
    expect_success(response.status(), method, url, reference)?;
    Ok(response)
}

fn expect_success(
    status: StatusCode,
    method: Method,
    url: &str,
    reference: &str,
) -> Result<(), RegistryError> {
    match status {
        status if status.is_success() => Ok(()),
        StatusCode::NOT_FOUND => NotFoundSnafu { reference }.fail(),
        status => UnexpectedStatusSnafu {
            method,
            url,
            status,
        }
        .fail(),
    }
}

pub(crate) struct RegistryFetcher {
    client: Arc<RegistryClient>,
    repo: ImageRef,
}

impl RegistryFetcher {
    pub fn new(client: Arc<RegistryClient>, repo: ImageRef) -> Self {
        Self { client, repo }
    }
}

#[async_trait]
impl Fetcher for RegistryFetcher {
    async fn fetch(&self, descriptor: &Descriptor) -> Result<ContentStream, RemoteError> {
        let domain = self.repo.domain();
        let kind = if descriptor.is_manifest() {
            "manifests"
        } else {
            "blobs"
        };
        let url = format!(
            "{}/{}/{kind}/{}",
            self.client.base_url(domain),
            self.repo.path(),
            descriptor.digest
        );
        let accept = if descriptor.is_manifest() {
            descriptor.media_type.clone()
        } else {
            "*/*".to_string()
        };

        tracing::debug!(digest = %descriptor.digest, repo = %self.repo.name(), "fetching");
        let response = self
            .client
            .send(domain, &Scope::pull(self.repo.path()), Method::GET, &url, |r| {
                r.header(reqwest::header::ACCEPT, &accept)
            })
            .await?;
        let reference = format!("{}@{}", self.repo.name(), descriptor.digest);
        let response = check_status(response, Method::GET, &url, &reference)?;

        Ok(response
            .bytes_stream()
            .map_err(move |e| {
                RemoteError::from(RegistryError::Request {
                    url: url.clone(),
                    source: e,
                })
            })
            .boxed())
    }
}

pub(crate) struct RegistryPusher {
    client: Arc<RegistryClient>,
    repo: ImageRef,
}

impl RegistryPusher {
    pub fn new(client: Arc<RegistryClient>, repo: ImageRef) -> Self {
        Self { client, repo }
    }

    fn url(&self, rest: &str) -> String {
        format!(
            "{}/{}/{rest}",
            self.client.base_url(self.repo.domain()),
            self.repo.path()
        )
    }

    fn scope(&self) -> Scope {
        Scope::push(self.repo.path())
    }

    /// Best effort; registries expire abandoned sessions on their own.
    async fn cancel_upload(&self, session: &str) {
        let result = self
            .client
            .send(self.repo.domain(), &self.scope(), Method::DELETE, session, |r| r)
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(url = session, "cancelled upload session");
            }
            Ok(response) => {
                tracing::debug!(url = session, status = %response.status(), "upload session not cancelled");
            }
            Err(e) => tracing::warn!(url = session, error = %e, "failed to cancel upload session"),
        }
    }

    async fn exists(&self, url: &str, accept: Option<&str>) -> Result<Option<Response>, RegistryError> {
        let response = self
            .client
            .send(self.repo.domain(), &self.scope(), Method::HEAD, url, |r| match accept {
                Some(accept) => r.header(reqwest::header::ACCEPT, accept),
                None => r,
            })
            .await?;
        Ok(response.status().is_success().then_some(response))
    }

    async fn push_manifest(
        &self,
        descriptor: &Descriptor,
    ) -> Result<Box<dyn ContentWriter>, RegistryError> {
        // Manifests go to the tag when the pusher was opened for one.
        let object = match self.repo.tag() {
            Some(tag) => tag.to_string(),
            None => descriptor.digest.to_string(),
        };
        let url = self.url(&format!("manifests/{object}"));

        if let Some(existing) = self.exists(&url, Some(&descriptor.media_type)).await? {
            let same_digest = self.repo.tag().is_none()
                || existing
                    .headers()
                    .get(DOCKER_CONTENT_DIGEST)
                    .and_then(|v| v.to_str().ok())
                    == Some(descriptor.digest.as_str());
            if same_digest {
                return AlreadyExistsSnafu {
                    object: format!("manifest {}@{}", self.repo.name(), descriptor.digest),
                }
                .fail();
            }
        }

        Ok(Box::new(ManifestWriter::new(
            self.client.clone(),
            self.repo.clone(),
            url,
            descriptor,
        )))
    }

    async fn push_blob(
        &self,
        descriptor: &Descriptor,
    ) -> Result<Box<dyn ContentWriter>, RegistryError> {
        let blob_url = self.url(&format!("blobs/{}", descriptor.digest));
        if self.exists(&blob_url, None).await?.is_some() {
            return AlreadyExistsSnafu {
                object: format!("blob {}@{}", self.repo.name(), descriptor.digest),
            }
            .fail();
        }

        let uploads = self.url("blobs/uploads/");
        let response = self
            .client
            .send(self.repo.domain(), &self.scope(), Method::POST, &uploads, |r| {
                r.header(CONTENT_LENGTH, 0)
            })
            .await?;
        let response = check_status(response, Method::POST, &uploads, &self.repo.name())?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok());
        let location = upload_location(location, &uploads, &descriptor.digest)?;

        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(UPLOAD_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let domain = self.repo.domain().to_string();
        let scope = self.scope();
        let size = descriptor.size;
        let upload = tokio::spawn(async move {
            let response = client
                .send_streamed(
                    &domain,
                    &scope,
                    Method::PUT,
                    &location,
                    Body::wrap_stream(rx),
                    |r| {
                        r.header(CONTENT_TYPE, "application/octet-stream")
                            .header(CONTENT_LENGTH, size)
                    },
                )
                .await?;
            check_status(response, Method::PUT, &location, &location).map(|_| ())
        });

        Ok(Box::new(BlobWriter {
            tx: Some(tx),
            upload: Some(upload),
            digest: descriptor.digest.clone(),
        }))
    }
}

/// Resolve the upload session `Location` and append the final digest.
fn session_url(
    location: Option<&str>,
    uploads: &str,
    digest: &Digest,
) -> Result<reqwest::Url, RegistryError> {
    let location = location.context(MissingLocationSnafu {
        digest: digest.clone(),
    })?;
    reqwest::Url::parse(uploads)
        .and_then(|base| base.join(location))
        .ok()
        .context(InvalidLocationSnafu { location })
}

fn upload_location(
    location: Option<&str>,
    uploads: &str,
    digest: &Digest,
) -> Result<String, RegistryError> {
    let mut url = session_url(location, uploads, digest)?;
    url.query_pairs_mut().append_pair("digest", digest.as_str());
    Ok(url.to_string())
}

#[async_trait]
impl Pusher for RegistryPusher {
    async fn push(&self, descriptor: &Descriptor) -> Result<Box<dyn ContentWriter>, RemoteError> {
        let writer = if descriptor.is_manifest() {
            self.push_manifest(descriptor).await?
        } else {
            self.push_blob(descriptor).await?
        };
        Ok(writer)
    }

    async fn mount(&self, descriptor: &Descriptor, source: &ImageRef) -> Result<(), RemoteError> {
        if source.domain() != self.repo.domain() {
            return Err(RemoteError::Unsupported(format!(
                "mount from another registry ({})",
                source.domain()
            )));
        }

        let url = self.url("blobs/uploads/");
        let scope = self.scope().and_pull(source.path());
        let digest = descriptor.digest.to_string();
        let from = source.path().to_string();
        let response = self
            .client
            .send(self.repo.domain(), &scope, Method::POST, &url, |r| {
                r.query(&[("mount", digest.as_str()), ("from", from.as_str())])
                    .header(CONTENT_LENGTH, 0)
            })
            .await?;

        match response.status() {
            StatusCode::CREATED => Ok(()),
            // The registry opened a regular upload session instead; the copy
            // fallback starts its own, so this one is cancelled.
            StatusCode::ACCEPTED => {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok());
                match session_url(location, &url, &descriptor.digest) {
                    Ok(session) => self.cancel_upload(session.as_str()).await,
                    Err(e) => tracing::debug!(error = %e, "no upload session to cancel"),
                }
                Err(RemoteError::Unsupported(format!(
                    "mount of {digest} from {}",
                    source.name()
                )))
            }
            status => Err(RegistryError::UnexpectedStatus {
                method: Method::POST,
                url,
                status,
            }
            .into()),
        }
    }
}

struct ManifestWriter {
    client: Arc<RegistryClient>,
    repo: ImageRef,
    url: String,
    media_type: String,
    digest: Digest,
    /// Declared size, capped at the largest manifest kept in memory.
    limit: u64,
    buf: BytesMut,
}

impl ManifestWriter {
    fn new(client: Arc<RegistryClient>, repo: ImageRef, url: String, descriptor: &Descriptor) -> Self {
        let limit = descriptor.size.min(MAX_MANIFEST_SIZE);
        Self {
            client,
            repo,
            url,
            media_type: descriptor.media_type.clone(),
            digest: descriptor.digest.clone(),
            limit,
            buf: BytesMut::with_capacity(limit as usize),
        }
    }
}

#[async_trait]
impl ContentWriter for ManifestWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<(), RemoteError> {
        let buffered = (self.buf.len() + chunk.len()) as u64;
        if buffered > self.limit {
            return Err(RemoteError::SizeMismatch {
                digest: self.digest.clone(),
                expected: self.limit,
                actual: buffered,
            });
        }
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>, size: u64, expected: &Digest) -> Result<(), RemoteError> {
        let ManifestWriter {
            client,
            repo,
            url,
            media_type,
            digest,
            buf,
            ..
        } = *self;
        let payload = buf.freeze();
        let actual = Digest::from_bytes(&payload);
        if payload.len() as u64 != size {
            return Err(RemoteError::SizeMismatch {
                digest: expected.clone(),
                expected: size,
                actual: payload.len() as u64,
            });
        }
        if &actual != expected || actual != digest {
            return Err(RemoteError::DigestMismatch {
                expected: expected.clone(),
                actual,
            });
        }

        let response = client
            .send(repo.domain(), &Scope::push(repo.path()), Method::PUT, &url, |r| {
                r.header(CONTENT_TYPE, &media_type).body(payload.clone())
            })
            .await?;
        check_status(response, Method::PUT, &url, &repo.name())?;
        tracing::debug!(digest = %expected, repo = %repo.name(), "manifest pushed");
        Ok(())
    }
}

struct BlobWriter {
    tx: Option<mpsc::Sender<Result<Bytes, std::io::Error>>>,
    upload: Option<JoinHandle<Result<(), RegistryError>>>,
    digest: Digest,
}

impl BlobWriter {
    /// Result of the upload request once its body has ended.
    async fn finish(&mut self) -> Result<(), RemoteError> {
        self.tx.take();
        let Some(upload) = self.upload.take() else {
            return Err(RegistryError::UploadAborted {
                digest: self.digest.clone(),
            }
            .into());
        };
        match upload.await {
            Ok(result) => result.map_err(RemoteError::from),
            Err(e) => Err(RemoteError::Registry(format!(
                "upload of {} failed: {e}",
                self.digest
            ))),
        }
    }
}

#[async_trait]
impl ContentWriter for BlobWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<(), RemoteError> {
        let Some(tx) = self.tx.as_mut() else {
            return Err(RegistryError::UploadAborted {
                digest: self.digest.clone(),
            }
            .into());
        };
        if tx.send(Ok(chunk)).await.is_err() {
            // The request ended early; its result says why.
            self.finish().await?;
            return Err(RegistryError::UploadAborted {
                digest: self.digest.clone(),
            }
            .into());
        }
        Ok(())
    }

    async fn commit(self: Box<Self>, _size: u64, expected: &Digest) -> Result<(), RemoteError> {
        let mut this = self;
        if expected != &this.digest {
            return Err(RemoteError::DigestMismatch {
                expected: this.digest.clone(),
                actual: expected.clone(),
            });
        }
        this.finish().await?;
        tracing::debug!(digest = %expected, "blob committed");
        Ok(())
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        // An uncommitted upload must not complete with partial content.
        if let Some(upload) = self.upload.take() {
            upload.abort();
        }
    }
}

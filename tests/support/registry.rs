// ABOUTME: In-memory registry implementing Resolver, Fetcher, and Pusher.
// ABOUTME: Stores content per repository and records every call for assertions.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use cnab_oci::remotes::{ContentStream, ContentWriter, Fetcher, Pusher, RemoteError, Resolver};
use cnab_oci::types::{Descriptor, Digest, ImageRef, media_types};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// Every call the fixup engine made, in order.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    pub resolves: Vec<String>,
    pub fetches: Vec<(String, Digest)>,
    /// Committed writes as (repository, digest).
    pub pushes: Vec<(String, Digest)>,
    /// Successful mounts as (repository, digest, from).
    pub mounts: Vec<(String, Digest, String)>,
}

impl CallLog {
    pub fn pushes_of(&self, digest: &Digest) -> usize {
        self.pushes.iter().filter(|(_, d)| d == digest).count()
    }
}

#[derive(Default)]
struct Inner {
    content: Mutex<HashMap<(String, Digest), (String, Bytes)>>,
    tags: Mutex<HashMap<(String, String), Digest>>,
    log: Mutex<CallLog>,
    mounts: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
}

#[derive(Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<Inner>,
}

fn repo_name(reference: &str) -> String {
    ImageRef::parse(reference).unwrap().name()
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept cross-repository blob mounts.
    pub fn with_mounts(self) -> Self {
        self.inner.mounts.store(true, Ordering::SeqCst);
        self
    }

    /// Slow every write down, leaving room to cancel mid-copy.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.inner.write_delay.lock() = Some(delay);
    }

    pub fn log(&self) -> CallLog {
        self.inner.log.lock().clone()
    }

    pub fn has(&self, repository: &str, digest: &Digest) -> bool {
        self.inner
            .content
            .lock()
            .contains_key(&(repo_name(repository), digest.clone()))
    }

    pub fn remove(&self, repository: &str, digest: &Digest) {
        self.inner
            .content
            .lock()
            .remove(&(repo_name(repository), digest.clone()));
    }

    pub fn read(&self, repository: &str, digest: &Digest) -> Option<Bytes> {
        self.inner
            .content
            .lock()
            .get(&(repo_name(repository), digest.clone()))
            .map(|(_, data)| data.clone())
    }

    pub fn put_blob(&self, repository: &str, media_type: &str, data: &[u8]) -> Descriptor {
        let descriptor = Descriptor::for_payload(media_type, data);
        self.inner.content.lock().insert(
            (repo_name(repository), descriptor.digest.clone()),
            (media_type.to_string(), Bytes::copy_from_slice(data)),
        );
        descriptor
    }

    /// Store a manifest and point the reference's tag at it.
    pub fn put_manifest(&self, reference: &str, media_type: &str, manifest: &serde_json::Value) -> Descriptor {
        let payload = serde_json::to_vec(manifest).unwrap();
        let descriptor = self.put_blob(reference, media_type, &payload);
        let image = ImageRef::parse(reference).unwrap();
        if let Some(tag) = image.tag() {
            self.inner
                .tags
                .lock()
                .insert((image.name(), tag.to_string()), descriptor.digest.clone());
        }
        descriptor
    }

    /// Store a single-platform OCI image made of a config and `layers`.
    pub fn put_image(&self, reference: &str, layers: &[&[u8]]) -> Descriptor {
        let config = self.put_blob(
            reference,
            CONFIG_MEDIA_TYPE,
            json!({"architecture": "amd64", "os": "linux"}).to_string().as_bytes(),
        );
        let layers: Vec<Descriptor> = layers
            .iter()
            .map(|data| self.put_blob(reference, LAYER_MEDIA_TYPE, data))
            .collect();
        self.put_manifest(
            reference,
            media_types::OCI_MANIFEST,
            &json!({
                "schemaVersion": 2,
                "mediaType": media_types::OCI_MANIFEST,
                "config": config,
                "layers": layers,
            }),
        )
    }

    /// Store an OCI index over already-stored manifests, one per `os/arch` platform.
    pub fn put_index(&self, reference: &str, manifests: &[(Descriptor, &str)]) -> Descriptor {
        let entries: Vec<serde_json::Value> = manifests
            .iter()
            .map(|(descriptor, platform)| {
                let (os, architecture) = platform.split_once('/').unwrap();
                json!({
                    "mediaType": descriptor.media_type,
                    "digest": descriptor.digest,
                    "size": descriptor.size,
                    "platform": {"os": os, "architecture": architecture},
                })
            })
            .collect();
        self.put_manifest(
            reference,
            media_types::OCI_INDEX,
            &json!({
                "schemaVersion": 2,
                "mediaType": media_types::OCI_INDEX,
                "manifests": entries,
            }),
        )
    }

    fn lookup(&self, repository: &str, digest: &Digest) -> Result<(String, Bytes), RemoteError> {
        self.inner
            .content
            .lock()
            .get(&(repository.to_string(), digest.clone()))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("{repository}@{digest}")))
    }
}

#[async_trait]
impl Resolver for MemoryRegistry {
    async fn resolve(&self, reference: &str) -> Result<(String, Descriptor), RemoteError> {
        self.inner.log.lock().resolves.push(reference.to_string());
        let image = ImageRef::parse(reference)?;
        let repository = image.name();
        let digest = match image.digest() {
            Some(digest) => digest.clone(),
            None => {
                let tag = image.tag().unwrap_or("latest").to_string();
                self.inner
                    .tags
                    .lock()
                    .get(&(repository.clone(), tag))
                    .cloned()
                    .ok_or_else(|| RemoteError::NotFound(reference.to_string()))?
            }
        };
        let (media_type, data) = self.lookup(&repository, &digest)?;
        Ok((
            reference.to_string(),
            Descriptor::new(media_type, digest, data.len() as u64),
        ))
    }

    async fn fetcher(&self, reference: &str) -> Result<Arc<dyn Fetcher>, RemoteError> {
        Ok(Arc::new(MemoryFetcher {
            registry: self.clone(),
            repository: ImageRef::parse(reference)?.name(),
        }))
    }

    async fn pusher(&self, reference: &str) -> Result<Arc<dyn Pusher>, RemoteError> {
        Ok(Arc::new(MemoryPusher {
            registry: self.clone(),
            repository: ImageRef::parse(reference)?.name(),
        }))
    }
}

struct MemoryFetcher {
    registry: MemoryRegistry,
    repository: String,
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, descriptor: &Descriptor) -> Result<ContentStream, RemoteError> {
        self.registry
            .inner
            .log
            .lock()
            .fetches
            .push((self.repository.clone(), descriptor.digest.clone()));
        let (_, data) = self.registry.lookup(&self.repository, &descriptor.digest)?;
        // Two chunks, so consumers have to stream.
        let middle = data.len() / 2;
        let chunks = vec![Ok(data.slice(..middle)), Ok(data.slice(middle..))];
        Ok(futures::stream::iter(chunks).boxed())
    }
}

struct MemoryPusher {
    registry: MemoryRegistry,
    repository: String,
}

#[async_trait]
impl Pusher for MemoryPusher {
    async fn push(&self, descriptor: &Descriptor) -> Result<Box<dyn ContentWriter>, RemoteError> {
        if self.registry.lookup(&self.repository, &descriptor.digest).is_ok() {
            return Err(RemoteError::AlreadyExists(descriptor.digest.to_string()));
        }
        Ok(Box::new(MemoryWriter {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            media_type: descriptor.media_type.clone(),
            buf: BytesMut::new(),
        }))
    }

    async fn mount(&self, descriptor: &Descriptor, source: &ImageRef) -> Result<(), RemoteError> {
        if !self.registry.inner.mounts.load(Ordering::SeqCst) {
            return Err(RemoteError::Unsupported("mount".into()));
        }
        let entry = self.registry.lookup(&source.name(), &descriptor.digest)?;
        self.registry
            .inner
            .content
            .lock()
            .insert((self.repository.clone(), descriptor.digest.clone()), entry);
        self.registry.inner.log.lock().mounts.push((
            self.repository.clone(),
            descriptor.digest.clone(),
            source.name(),
        ));
        Ok(())
    }
}

struct MemoryWriter {
    registry: MemoryRegistry,
    repository: String,
    media_type: String,
    buf: BytesMut,
}

#[async_trait]
impl ContentWriter for MemoryWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<(), RemoteError> {
        let delay = *self.registry.inner.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>, size: u64, expected: &Digest) -> Result<(), RemoteError> {
        let MemoryWriter {
            registry,
            repository,
            media_type,
            buf,
        } = *self;
        let data = buf.freeze();
        let actual = Digest::from_bytes(&data);
        if data.len() as u64 != size || &actual != expected {
            return Err(RemoteError::DigestMismatch {
                expected: expected.clone(),
                actual,
            });
        }
        registry
            .inner
            .content
            .lock()
            .insert((repository.clone(), actual.clone()), (media_type, data));
        registry.inner.log.lock().pushes.push((repository, actual));
        Ok(())
    }
}

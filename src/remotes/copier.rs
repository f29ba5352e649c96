// ABOUTME: Copies one descriptor from the source repository to the target repository.
// ABOUTME: Tries a cross-repository mount for blobs, then streams bytes with size and digest checks.

use super::events::EventNotifier;
use super::progress::DescriptorProgress;
use super::{ContentWriter, Fetcher, Pusher, RemoteError};
use crate::types::{Descriptor, Digester, ImageRef};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Annotation prefix hinting the registry where a blob can be mounted from.
pub const DISTRIBUTION_SOURCE_LABEL: &str = "containerd.io/distribution.source";

pub const ACTION_COPY: &str = "Copy";
pub const ACTION_MOUNTED: &str = "Mounted";
pub const ACTION_SKIP_FOREIGN: &str = "Skip (foreign layer)";

pub(crate) struct DescriptorCopier {
    source: Arc<dyn Fetcher>,
    target: Arc<dyn Pusher>,
    notifier: EventNotifier,
    original_source: ImageRef,
    target_repo: ImageRef,
}

impl DescriptorCopier {
    pub(crate) fn new(
        source: Arc<dyn Fetcher>,
        target: Arc<dyn Pusher>,
        notifier: EventNotifier,
        original_source: ImageRef,
        target_repo: ImageRef,
    ) -> Self {
        Self {
            source,
            target,
            notifier,
            original_source,
            target_repo,
        }
    }

    /// Copy (or mount) the node's descriptor, recording the outcome on the node.
    pub(crate) async fn handle(
        &self,
        ctx: &CancellationToken,
        node: &DescriptorProgress,
    ) -> Result<(), RemoteError> {
        if node.descriptor().is_foreign() {
            node.mark_done();
            node.set_action(ACTION_SKIP_FOREIGN);
            return Ok(());
        }

        node.set_action(ACTION_COPY);
        self.notifier.report_progress(None);

        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(RemoteError::Canceled),
            result = self.transfer(node) => result,
        };

        match &result {
            Ok(()) => self.notifier.report_progress(None),
            Err(e) => {
                node.set_error(e);
                self.notifier.report_progress(Some(e as &dyn std::error::Error));
            }
        }
        result
    }

    async fn transfer(&self, node: &DescriptorProgress) -> Result<(), RemoteError> {
        let descriptor = node.descriptor();

        if self.can_mount(descriptor) {
            match self.target.mount(descriptor, &self.original_source).await {
                Ok(()) => {
                    tracing::debug!(digest = %descriptor.digest, from = %self.original_source.name(), "blob mounted");
                    node.set_action(ACTION_MOUNTED);
                    node.mark_done();
                    return Ok(());
                }
                Err(e) if e.is_already_exists() => {
                    node.mark_done();
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(digest = %descriptor.digest, error = %e, "mount failed, falling back to copy");
                }
            }
        }

        let annotated = self.with_distribution_source(descriptor);
        let writer = match self.target.push(&annotated).await {
            Ok(writer) => writer,
            Err(e) if e.is_already_exists() => {
                tracing::debug!(digest = %descriptor.digest, "already present in target");
                node.mark_done();
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match self.stream_into(descriptor, writer).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e),
        }
        node.mark_done();
        Ok(())
    }

    async fn stream_into(
        &self,
        descriptor: &Descriptor,
        mut writer: Box<dyn ContentWriter>,
    ) -> Result<(), RemoteError> {
        let mut stream = self.source.fetch(descriptor).await?;
        let mut digester = Digester::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            digester.update(&chunk);
            if digester.written() > descriptor.size {
                return Err(RemoteError::SizeMismatch {
                    digest: descriptor.digest.clone(),
                    expected: descriptor.size,
                    actual: digester.written(),
                });
            }
            writer.write(chunk).await?;
        }

        if digester.written() != descriptor.size {
            return Err(RemoteError::SizeMismatch {
                digest: descriptor.digest.clone(),
                expected: descriptor.size,
                actual: digester.written(),
            });
        }
        // Only sha256 content can be verified locally.
        if descriptor.digest.algorithm() == "sha256" {
            let actual = digester.finish();
            if actual != descriptor.digest {
                return Err(RemoteError::DigestMismatch {
                    expected: descriptor.digest.clone(),
                    actual,
                });
            }
        }

        writer.commit(descriptor.size, &descriptor.digest).await
    }

    /// Blobs moving between repositories of one registry can be mounted.
    fn can_mount(&self, descriptor: &Descriptor) -> bool {
        !descriptor.is_manifest()
            && self.original_source.domain() == self.target_repo.domain()
            && !self.original_source.same_repository(&self.target_repo)
    }

    fn with_distribution_source(&self, descriptor: &Descriptor) -> Descriptor {
        let mut annotated = descriptor.clone();
        annotated.annotations.insert(
            format!("{DISTRIBUTION_SOURCE_LABEL}.{}", self.original_source.domain()),
            self.original_source.familiar_name(),
        );
        annotated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remotes::events::{FixupEvent, spawn_event_loop};
    use crate::remotes::{ContentStream, LocalContentFetcher};
    use crate::types::{Digest, media_types};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct Empty;

    #[async_trait]
    impl Fetcher for Empty {
        async fn fetch(&self, descriptor: &Descriptor) -> Result<ContentStream, RemoteError> {
            Err(RemoteError::NotFound(descriptor.digest.to_string()))
        }
    }

    #[derive(Default)]
    struct Store {
        blobs: Mutex<HashMap<Digest, Vec<u8>>>,
        annotations: Mutex<Vec<(String, String)>>,
        mounts: Mutex<Vec<Digest>>,
        mount_supported: bool,
    }

    struct Writer {
        store: Arc<Store>,
        digest: Digest,
        buf: Vec<u8>,
    }

    #[async_trait]
    impl ContentWriter for Writer {
        async fn write(&mut self, chunk: Bytes) -> Result<(), RemoteError> {
            self.buf.extend_from_slice(&chunk);
            Ok(())
        }

        async fn commit(self: Box<Self>, _size: u64, _expected: &Digest) -> Result<(), RemoteError> {
            let Writer { store, digest, buf } = *self;
            store.blobs.lock().insert(digest, buf);
            Ok(())
        }
    }

    struct StorePusher(Arc<Store>);

    #[async_trait]
    impl Pusher for StorePusher {
        async fn push(&self, descriptor: &Descriptor) -> Result<Box<dyn ContentWriter>, RemoteError> {
            if self.0.blobs.lock().contains_key(&descriptor.digest) {
                return Err(RemoteError::AlreadyExists(descriptor.digest.to_string()));
            }
            self.0.annotations.lock().extend(descriptor.annotations.clone());
            Ok(Box::new(Writer {
                store: self.0.clone(),
                digest: descriptor.digest.clone(),
                buf: Vec::new(),
            }))
        }

        async fn mount(&self, descriptor: &Descriptor, _source: &ImageRef) -> Result<(), RemoteError> {
            if !self.0.mount_supported {
                return Err(RemoteError::Unsupported("mount".into()));
            }
            self.0.mounts.lock().push(descriptor.digest.clone());
            Ok(())
        }
    }

    fn copier(source: Arc<dyn Fetcher>, store: Arc<Store>, from: &str, to: &str) -> DescriptorCopier {
        let (tx, _handle) = spawn_event_loop(Arc::new(|_: FixupEvent| {}));
        DescriptorCopier::new(
            source,
            Arc::new(StorePusher(store)),
            EventNotifier::new(tx, from, to),
            ImageRef::parse(from).unwrap(),
            ImageRef::parse(to).unwrap(),
        )
    }

    fn local(payload: &'static [u8]) -> (Arc<LocalContentFetcher>, Descriptor) {
        let fetcher = LocalContentFetcher::new(Arc::new(Empty));
        fetcher.add(Bytes::from_static(payload));
        (
            Arc::new(fetcher),
            Descriptor::for_payload("application/vnd.oci.image.layer.v1.tar", payload),
        )
    }

    #[tokio::test]
    async fn copies_bytes_with_distribution_source_hint() {
        let (source, desc) = local(b"layer-bytes");
        let store = Arc::new(Store::default());
        let copier = copier(source, store.clone(), "docker.io/library/nginx:1", "registry.io/ns/app");

        let node = DescriptorProgress::new(desc.clone());
        copier.handle(&CancellationToken::new(), &node).await.unwrap();

        assert!(node.is_done());
        assert_eq!(node.action(), ACTION_COPY);
        assert_eq!(store.blobs.lock()[&desc.digest], b"layer-bytes");
        assert_eq!(
            store.annotations.lock().clone(),
            vec![(
                "containerd.io/distribution.source.docker.io".to_string(),
                "nginx".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn already_present_is_success() {
        let (source, desc) = local(b"layer-bytes");
        let store = Arc::new(Store::default());
        store.blobs.lock().insert(desc.digest.clone(), b"layer-bytes".to_vec());
        let copier = copier(source, store, "registry.io/other/app", "registry2.io/ns/app");

        let node = DescriptorProgress::new(desc);
        copier.handle(&CancellationToken::new(), &node).await.unwrap();
        assert!(node.is_done());
    }

    #[tokio::test]
    async fn mounts_blobs_within_one_registry() {
        let (source, desc) = local(b"layer-bytes");
        let store = Arc::new(Store {
            mount_supported: true,
            ..Default::default()
        });
        let copier = copier(source, store.clone(), "registry.io/other/app:1", "registry.io/ns/app");

        let node = DescriptorProgress::new(desc.clone());
        copier.handle(&CancellationToken::new(), &node).await.unwrap();
        assert_eq!(node.action(), ACTION_MOUNTED);
        assert_eq!(store.mounts.lock().clone(), vec![desc.digest]);
        assert!(store.blobs.lock().is_empty());
    }

    #[tokio::test]
    async fn unsupported_mount_falls_back_to_copy() {
        let (source, desc) = local(b"layer-bytes");
        let store = Arc::new(Store::default());
        let copier = copier(source, store.clone(), "registry.io/other/app:1", "registry.io/ns/app");

        let node = DescriptorProgress::new(desc.clone());
        copier.handle(&CancellationToken::new(), &node).await.unwrap();
        assert_eq!(node.action(), ACTION_COPY);
        assert!(store.blobs.lock().contains_key(&desc.digest));
    }

    #[tokio::test]
    async fn foreign_layers_are_skipped() {
        let store = Arc::new(Store::default());
        let copier = copier(Arc::new(Empty), store.clone(), "registry.io/a/b", "registry.io/c/d");
        let mut desc = Descriptor::for_payload(
            "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip",
            b"windows",
        );
        desc.urls.push("https://example.invalid/layer".into());

        let node = DescriptorProgress::new(desc);
        copier.handle(&CancellationToken::new(), &node).await.unwrap();
        assert_eq!(node.action(), ACTION_SKIP_FOREIGN);
        assert!(node.is_done());
        assert!(store.blobs.lock().is_empty());
    }

    #[tokio::test]
    async fn rejects_content_with_wrong_size() {
        let (source, mut desc) = local(b"layer-bytes");
        desc.size += 1;
        let store = Arc::new(Store::default());
        let copier = copier(source, store.clone(), "registry.io/a/b", "other.io/c/d");

        let node = DescriptorProgress::new(desc);
        let err = copier.handle(&CancellationToken::new(), &node).await.unwrap_err();
        assert!(matches!(err, RemoteError::SizeMismatch { .. }));
        assert!(!node.is_done());
        assert!(node.snapshot().error.is_some());
        assert!(store.blobs.lock().is_empty());
    }

    #[tokio::test]
    async fn manifests_are_never_mounted() {
        let payload: &'static [u8] = b"{\"schemaVersion\":2}";
        let fetcher = LocalContentFetcher::new(Arc::new(Empty));
        fetcher.add(Bytes::from_static(payload));
        let desc = Descriptor::for_payload(media_types::OCI_MANIFEST, payload);
        let store = Arc::new(Store {
            mount_supported: true,
            ..Default::default()
        });
        let copier = copier(Arc::new(fetcher), store.clone(), "registry.io/a/b", "registry.io/c/d");

        let node = DescriptorProgress::new(desc.clone());
        copier.handle(&CancellationToken::new(), &node).await.unwrap();
        assert!(store.mounts.lock().is_empty());
        assert!(store.blobs.lock().contains_key(&desc.digest));
    }
}

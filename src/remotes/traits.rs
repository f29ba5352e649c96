// ABOUTME: Registry capability traits consumed by the fixup engine.
// ABOUTME: Resolver, Fetcher, Pusher, and ContentWriter; implementations are injected by callers.

use super::RemoteError;
use crate::types::{Descriptor, Digest, ImageRef};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Stream of content bytes for one descriptor.
pub type ContentStream = BoxStream<'static, Result<Bytes, RemoteError>>;

/// Resolves references and hands out per-repository fetchers and pushers.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve a reference to the name it was found under and its descriptor.
    async fn resolve(&self, reference: &str) -> Result<(String, Descriptor), RemoteError>;

    /// Fetcher for content in the repository named by `reference`.
    async fn fetcher(&self, reference: &str) -> Result<Arc<dyn Fetcher>, RemoteError>;

    /// Pusher for content into the repository named by `reference`.
    async fn pusher(&self, reference: &str) -> Result<Arc<dyn Pusher>, RemoteError>;
}

/// Reads content by descriptor.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, descriptor: &Descriptor) -> Result<ContentStream, RemoteError>;
}

/// Writes content by descriptor.
#[async_trait]
pub trait Pusher: Send + Sync {
    /// Start writing `descriptor`.
    ///
    /// Returns `RemoteError::AlreadyExists` when the destination already holds
    /// the content.
    async fn push(&self, descriptor: &Descriptor) -> Result<Box<dyn ContentWriter>, RemoteError>;

    /// Attach a blob that already exists in `source` without transferring it.
    ///
    /// Implementations that cannot mount return `RemoteError::Unsupported`,
    /// which makes the caller fall back to a full copy.
    async fn mount(&self, descriptor: &Descriptor, source: &ImageRef) -> Result<(), RemoteError> {
        let _ = source;
        Err(RemoteError::Unsupported(format!(
            "cross-repository mount of {}",
            descriptor.digest
        )))
    }
}

/// An in-progress write; nothing is visible at the destination until commit.
#[async_trait]
pub trait ContentWriter: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<(), RemoteError>;

    async fn commit(self: Box<Self>, size: u64, expected: &Digest) -> Result<(), RemoteError>;
}

/// Largest manifest held in memory; registries refuse bigger ones.
pub const MAX_MANIFEST_SIZE: u64 = 4 * 1024 * 1024;

/// Read a whole descriptor into memory. Only used for manifests.
///
/// The descriptor's size comes from the registry, so it only bounds the
/// buffer once capped at [`MAX_MANIFEST_SIZE`]. Reading past either limit,
/// or stopping short of the declared size, is a size mismatch.
pub async fn fetch_all(
    fetcher: &dyn Fetcher,
    descriptor: &Descriptor,
) -> Result<Bytes, RemoteError> {
    let limit = descriptor.size.min(MAX_MANIFEST_SIZE);
    let mismatch = |actual: usize| RemoteError::SizeMismatch {
        digest: descriptor.digest.clone(),
        expected: descriptor.size,
        actual: actual as u64,
    };

    let mut stream = fetcher.fetch(descriptor).await?;
    let mut buf = BytesMut::with_capacity(limit as usize);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let read = buf.len() + chunk.len();
        if read as u64 > limit {
            return Err(mismatch(read));
        }
        buf.extend_from_slice(&chunk);
    }
    if buf.len() as u64 != descriptor.size {
        return Err(mismatch(buf.len()));
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::media_types;
    use futures::stream;

    const INDEX: &str = r#"{"manifests":[]}"#;

    /// Serves fixed chunks for any descriptor.
    struct Chunks(Vec<Bytes>);

    impl Chunks {
        fn of(parts: &[&'static str]) -> Self {
            Self(parts.iter().map(|p| Bytes::from_static(p.as_bytes())).collect())
        }
    }

    #[async_trait]
    impl Fetcher for Chunks {
        async fn fetch(&self, _descriptor: &Descriptor) -> Result<ContentStream, RemoteError> {
            let chunks: Vec<Result<Bytes, RemoteError>> = self.0.iter().cloned().map(Ok).collect();
            Ok(stream::iter(chunks).boxed())
        }
    }

    fn index_descriptor(size: u64) -> Descriptor {
        let mut desc = Descriptor::for_payload(media_types::OCI_INDEX, INDEX.as_bytes());
        desc.size = size;
        desc
    }

    #[tokio::test]
    async fn reads_content_of_the_declared_size() {
        let fetcher = Chunks::of(&[r#"{"manifests""#, ":[]}"]);
        let data = fetch_all(&fetcher, &index_descriptor(16)).await.unwrap();
        assert_eq!(&data[..], INDEX.as_bytes());
    }

    #[tokio::test]
    async fn huge_declared_size_is_a_mismatch_not_an_allocation() {
        let fetcher = Chunks::of(&[INDEX]);
        let err = fetch_all(&fetcher, &index_descriptor(u64::MAX)).await.unwrap_err();
        assert!(matches!(
            err,
            RemoteError::SizeMismatch { expected: u64::MAX, actual: 16, .. }
        ));
    }

    #[tokio::test]
    async fn content_longer_than_declared_stops_early() {
        let fetcher = Chunks::of(&[r#"{"manifests""#, ":[]}", "trailing"]);
        let err = fetch_all(&fetcher, &index_descriptor(16)).await.unwrap_err();
        assert!(matches!(err, RemoteError::SizeMismatch { actual: 24, .. }));
    }

    #[tokio::test]
    async fn content_past_the_manifest_limit_is_rejected() {
        static MIB: [u8; 1024 * 1024] = [b' '; 1024 * 1024];
        let fetcher = Chunks(vec![Bytes::from_static(&MIB); 5]);
        let err = fetch_all(&fetcher, &index_descriptor(5 * 1024 * 1024))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RemoteError::SizeMismatch { actual, .. } if actual > MAX_MANIFEST_SIZE
        ));
    }
}

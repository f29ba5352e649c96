// ABOUTME: Source fetcher overlay serving synthetic content from memory.
// ABOUTME: Holds rewritten manifests (e.g. platform-filtered indexes) addressed by their digest.

use super::{ContentStream, Fetcher, RemoteError};
use crate::types::{Descriptor, Digest};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub struct LocalContentFetcher {
    inner: Arc<dyn Fetcher>,
    local: RwLock<HashMap<Digest, Bytes>>,
}

impl LocalContentFetcher {
    pub fn new(inner: Arc<dyn Fetcher>) -> Self {
        Self {
            inner,
            local: RwLock::new(HashMap::new()),
        }
    }

    /// Register a payload; later fetches of its digest never reach the network.
    pub fn add(&self, data: impl Into<Bytes>) -> Digest {
        let data = data.into();
        let digest = Digest::from_bytes(&data);
        self.local.write().insert(digest.clone(), data);
        digest
    }
}

#[async_trait]
impl Fetcher for LocalContentFetcher {
    async fn fetch(&self, descriptor: &Descriptor) -> Result<ContentStream, RemoteError> {
        let local = self.local.read().get(&descriptor.digest).cloned();
        match local {
            Some(data) => Ok(Box::pin(futures::stream::once(async move { Ok(data) }))),
            None => self.inner.fetch(descriptor).await,
        }
    }
}

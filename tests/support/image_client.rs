// ABOUTME: Local image store double implementing ImageClient.
// ABOUTME: Tagging copies a local image record; pushing writes it into a MemoryRegistry.

use super::registry::MemoryRegistry;
use async_trait::async_trait;
use cnab_oci::image_client::{ImageClient, ImageClientError};
use cnab_oci::types::ImageRef;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Layers of an image held by the local daemon.
#[derive(Debug, Clone)]
struct LocalImage {
    layers: Vec<Vec<u8>>,
}

pub struct MockImageClient {
    registry: MemoryRegistry,
    images: Mutex<HashMap<String, LocalImage>>,
    calls: Mutex<Vec<String>>,
}

impl MockImageClient {
    pub fn new(registry: MemoryRegistry) -> Self {
        Self {
            registry,
            images: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make an image available locally under `name` (a reference or a digest).
    pub fn add_local(&self, name: &str, layers: &[&[u8]]) {
        self.images.lock().insert(
            name.to_string(),
            LocalImage {
                layers: layers.iter().map(|l| l.to_vec()).collect(),
            },
        );
    }

    /// Calls in order, as `tag <source> <target>` or `push <target>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ImageClient for MockImageClient {
    async fn tag(&self, source: &str, target: &ImageRef) -> Result<(), ImageClientError> {
        self.calls.lock().push(format!("tag {source} {target}"));
        let mut images = self.images.lock();
        let image = images
            .get(source)
            .cloned()
            .ok_or_else(|| ImageClientError::NotFound(source.to_string()))?;
        images.insert(target.to_string(), image);
        Ok(())
    }

    async fn push(&self, target: &ImageRef) -> Result<(), ImageClientError> {
        self.calls.lock().push(format!("push {target}"));
        let image = self
            .images
            .lock()
            .get(&target.to_string())
            .cloned()
            .ok_or_else(|| ImageClientError::NotFound(target.to_string()))?;
        let layers: Vec<&[u8]> = image.layers.iter().map(Vec::as_slice).collect();
        self.registry.put_image(&target.to_string(), &layers);
        Ok(())
    }
}

// ABOUTME: Per-call fixup options and their validated form.
// ABOUTME: Builder with defaults; validation happens before any network call.

use super::FixupError;
use crate::bundle::RelocationMap;
use crate::image_client::ImageClient;
use crate::remotes::events::{EventCallback, FixupEvent};
use crate::types::PlatformMatcher;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
pub const DEFAULT_JOB_BUFFER_SIZE: usize = 50;

/// Options for [`fixup_bundle`](super::fixup_bundle).
#[derive(Clone)]
pub struct FixupOptions {
    /// Receives start, progress, and end events for every image.
    pub event_callback: Option<EventCallback>,
    /// Platforms kept when the invocation image is an index.
    pub invocation_platforms: Option<Arc<dyn PlatformMatcher>>,
    /// Platforms kept when a component image is an index.
    pub component_platforms: Option<Arc<dyn PlatformMatcher>>,
    /// Copy tasks running at once (default: 4).
    pub max_concurrent_jobs: usize,
    /// Copy tasks queued before submission waits (default: 50).
    pub job_buffer_size: usize,
    /// Overwrite bundle digests, sizes and media types with resolved values
    /// instead of checking them.
    pub auto_bundle_update: bool,
    /// Push images from the local image store when they cannot be resolved.
    pub push_images: bool,
    pub image_client: Option<Arc<dyn ImageClient>>,
    /// Known relocations from an earlier run.
    pub relocation_map: RelocationMap,
}

impl Default for FixupOptions {
    fn default() -> Self {
        Self {
            event_callback: None,
            invocation_platforms: None,
            component_platforms: None,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            job_buffer_size: DEFAULT_JOB_BUFFER_SIZE,
            auto_bundle_update: false,
            push_images: false,
            image_client: None,
            relocation_map: RelocationMap::new(),
        }
    }
}

impl fmt::Debug for FixupOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixupOptions")
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .field("job_buffer_size", &self.job_buffer_size)
            .field("auto_bundle_update", &self.auto_bundle_update)
            .field("push_images", &self.push_images)
            .field("relocation_map", &self.relocation_map)
            .finish_non_exhaustive()
    }
}

impl FixupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(FixupEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(Arc::new(callback));
        self
    }

    pub fn invocation_platforms(mut self, matcher: impl PlatformMatcher + 'static) -> Self {
        self.invocation_platforms = Some(Arc::new(matcher));
        self
    }

    pub fn component_platforms(mut self, matcher: impl PlatformMatcher + 'static) -> Self {
        self.component_platforms = Some(Arc::new(matcher));
        self
    }

    pub fn max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs;
        self
    }

    pub fn job_buffer_size(mut self, size: usize) -> Self {
        self.job_buffer_size = size;
        self
    }

    pub fn auto_bundle_update(mut self, enabled: bool) -> Self {
        self.auto_bundle_update = enabled;
        self
    }

    /// Enable pushing local images through `client`.
    pub fn push_images(mut self, client: Arc<dyn ImageClient>) -> Self {
        self.push_images = true;
        self.image_client = Some(client);
        self
    }

    pub fn relocation_map(mut self, map: RelocationMap) -> Self {
        self.relocation_map = map;
        self
    }

    pub(crate) fn validate(self) -> Result<FixupConfig, FixupError> {
        if self.max_concurrent_jobs == 0 {
            return Err(FixupError::InvalidConfig(
                "max concurrent jobs must be at least 1".to_string(),
            ));
        }
        if self.job_buffer_size == 0 {
            return Err(FixupError::InvalidConfig(
                "job buffer size must be at least 1".to_string(),
            ));
        }
        let image_client = match (self.push_images, self.image_client) {
            (true, None) => {
                return Err(FixupError::InvalidConfig(
                    "pushing local images requires an image client".to_string(),
                ));
            }
            (true, client) => client,
            (false, _) => None,
        };

        Ok(FixupConfig {
            event_callback: self.event_callback.unwrap_or_else(|| Arc::new(|_: FixupEvent| {})),
            invocation_platforms: self.invocation_platforms,
            component_platforms: self.component_platforms,
            max_concurrent_jobs: self.max_concurrent_jobs,
            job_buffer_size: self.job_buffer_size,
            auto_bundle_update: self.auto_bundle_update,
            image_client,
            relocation_map: self.relocation_map,
        })
    }
}

/// Validated options threaded through one fixup invocation.
pub(crate) struct FixupConfig {
    pub event_callback: EventCallback,
    pub invocation_platforms: Option<Arc<dyn PlatformMatcher>>,
    pub component_platforms: Option<Arc<dyn PlatformMatcher>>,
    pub max_concurrent_jobs: usize,
    pub job_buffer_size: usize,
    pub auto_bundle_update: bool,
    /// Present exactly when pushing local images is enabled.
    pub image_client: Option<Arc<dyn ImageClient>>,
    pub relocation_map: RelocationMap,
}

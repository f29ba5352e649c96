// ABOUTME: Bundle fixup entry point: makes every bundle image resolvable in one target repository.
// ABOUTME: Resolves, checks, filters, and copies each image in turn while streaming events.

mod error;
mod options;
mod platforms;
mod strategies;

pub use error::FixupError;
pub use options::{DEFAULT_JOB_BUFFER_SIZE, DEFAULT_MAX_CONCURRENT_JOBS, FixupOptions};

use super::copier::DescriptorCopier;
use super::events::{EventNotifier, FixupEvent, FixupEventType, spawn_event_loop};
use super::walker::ManifestWalker;
use super::{LocalContentFetcher, Resolver};
use crate::bundle::{BaseImage, Bundle, RelocationMap};
use crate::types::{Descriptor, Digest, ImageRef, PlatformMatcher};
use options::FixupConfig;
use std::collections::HashSet;
use std::sync::Arc;
use strategies::{FixupInfo, StrategyEnv, fixup_base_image};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Service name reported for the invocation image.
pub const INVOCATION_IMAGE_NAME: &str = "InvocationImage";

/// Make every image of `bundle` resolvable inside `target`'s repository.
///
/// Returns the relocation map from original references to digested
/// references in the target repository. With auto-update enabled the
/// bundle's image digests, sizes and media types are rewritten in place.
/// All queued events are delivered before this returns, on success or error.
pub async fn fixup_bundle(
    ctx: &CancellationToken,
    bundle: &mut Bundle,
    target: &ImageRef,
    resolver: &dyn Resolver,
    options: FixupOptions,
) -> Result<RelocationMap, FixupError> {
    tracing::debug!(target_ref = %target, "fixing up bundle");
    let config = options.validate()?;

    let (events, event_loop) = spawn_event_loop(config.event_callback.clone());
    let result = BundleFixup {
        ctx,
        target,
        resolver,
        relocation_map: config.relocation_map.clone(),
        config: &config,
        events,
        scheduled: HashSet::new(),
    }
    .run(bundle)
    .await;

    // The sender was dropped with the fixup state, so the loop drains and ends.
    if let Err(e) = event_loop.await {
        tracing::warn!(error = %e, "event delivery ended abnormally");
    }
    if result.is_ok() {
        tracing::debug!(target_ref = %target, "bundle fixed");
    }
    result
}

struct BundleFixup<'a> {
    ctx: &'a CancellationToken,
    target: &'a ImageRef,
    resolver: &'a dyn Resolver,
    config: &'a FixupConfig,
    relocation_map: RelocationMap,
    events: UnboundedSender<FixupEvent>,
    /// Digests already handed to a copy task during this invocation.
    scheduled: HashSet<Digest>,
}

impl BundleFixup<'_> {
    async fn run(mut self, bundle: &mut Bundle) -> Result<RelocationMap, FixupError> {
        if bundle.invocation_images.len() != 1 {
            return Err(FixupError::MultipleInvocationImages {
                target: self.target.to_string(),
            });
        }

        let invocation_filter = self.config.invocation_platforms.clone();
        let component_filter = self.config.component_platforms.clone();

        self.fixup_image(
            INVOCATION_IMAGE_NAME,
            &mut bundle.invocation_images[0].base,
            invocation_filter.as_deref(),
        )
        .await?;

        for (name, image) in bundle.images.iter_mut() {
            self.fixup_image(name, &mut image.base, component_filter.as_deref())
                .await?;
        }
        Ok(self.relocation_map)
    }

    async fn fixup_image(
        &mut self,
        name: &str,
        base: &mut BaseImage,
        filter: Option<&dyn PlatformMatcher>,
    ) -> Result<(), FixupError> {
        // Copy from the relocated image when an earlier run already moved it.
        let mut source_image = base.clone();
        if let Some(relocated) = self.relocation_map.get(&base.image) {
            source_image.image = relocated.to_string();
        }

        let notifier = EventNotifier::new(
            self.events.clone(),
            source_image.image.clone(),
            self.target.to_string(),
        );
        notifier.notify(FixupEventType::CopyImageStart, "", None);

        match self.fixup_source(name, base, &source_image, filter, &notifier).await {
            Ok(message) => {
                tracing::info!(service = name, image = %base.image, "image fixed up");
                notifier.notify(FixupEventType::CopyImageEnd, message, None);
                Ok(())
            }
            Err(e) => {
                notifier.notify(FixupEventType::CopyImageEnd, "", Some(&e as &dyn std::error::Error));
                Err(e)
            }
        }
    }

    /// Returns the message for the image's end event.
    async fn fixup_source(
        &mut self,
        name: &str,
        base: &mut BaseImage,
        source_image: &BaseImage,
        filter: Option<&dyn PlatformMatcher>,
        notifier: &EventNotifier,
    ) -> Result<String, FixupError> {
        let env = StrategyEnv {
            target: self.target,
            resolver: self.resolver,
            image_client: self.config.image_client.as_deref(),
            relocation_map: &self.relocation_map,
        };
        let resolution = fixup_base_image(&env, name, source_image).await?;
        let FixupInfo {
            target_repo,
            source_ref,
            mut descriptor,
        } = resolution.info;

        tracing::debug!(image = %base.image, "updating entry in relocation map");
        self.record(base, &target_repo, &descriptor);
        self.check_consistency(base, &descriptor)?;

        let source_ref = match source_ref {
            Some(source_ref) if !resolution.pushed => source_ref,
            _ => return Ok(format!("Image has been pushed for service {name}")),
        };
        if source_ref.same_repository(&target_repo) {
            return Ok(format!(
                "Nothing to do: image reference is already present in repository {target_repo}"
            ));
        }

        let fetcher = Arc::new(LocalContentFetcher::new(
            self.resolver.fetcher(&source_ref.name()).await?,
        ));

        // Only the copy root changes; the bundle and the relocation map keep
        // the descriptor the reference resolves to.
        if let Some(filter) = filter {
            platforms::fixup_platforms(&mut descriptor, &source_ref, &fetcher, filter).await?;
        }

        let pusher = self.resolver.pusher(&target_repo.name()).await?;
        let copier = DescriptorCopier::new(
            fetcher.clone(),
            pusher,
            notifier.clone(),
            source_ref,
            target_repo.clone(),
        );
        ManifestWalker::new(self.resolver, fetcher, copier, notifier.clone(), target_repo)
            .concurrency(self.config.max_concurrent_jobs, self.config.job_buffer_size)
            .walk(self.ctx, &descriptor, &mut self.scheduled)
            .await?;
        Ok(String::new())
    }

    fn record(&mut self, base: &BaseImage, target_repo: &ImageRef, descriptor: &Descriptor) {
        let relocated = target_repo.with_digest(descriptor.digest.clone());
        self.relocation_map.insert(base.image.clone(), relocated.to_string());
    }

    /// Pinned bundle values must match what was resolved unless auto-update is on.
    fn check_consistency(
        &self,
        base: &mut BaseImage,
        descriptor: &Descriptor,
    ) -> Result<(), FixupError> {
        if self.config.auto_bundle_update {
            base.digest = descriptor.digest.to_string();
            base.size = descriptor.size;
            base.media_type = descriptor.media_type.clone();
            return Ok(());
        }

        if base.digest != descriptor.digest.as_str() {
            return Err(FixupError::DigestDiffers {
                image: base.image.clone(),
                expected: base.digest.clone(),
                actual: descriptor.digest.to_string(),
            });
        }
        if base.size != descriptor.size {
            return Err(FixupError::SizeDiffers {
                image: base.image.clone(),
                expected: base.size,
                actual: descriptor.size,
            });
        }
        if base.media_type != descriptor.media_type {
            return Err(FixupError::MediaTypeDiffers {
                image: base.image.clone(),
                expected: base.media_type.clone(),
                actual: descriptor.media_type.clone(),
            });
        }
        Ok(())
    }
}

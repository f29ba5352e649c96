// ABOUTME: Expands a manifest graph into copy tasks and runs them deepest-first.
// ABOUTME: One task per unique digest; each depth is a wave on its own bounded scheduler.

use super::copier::DescriptorCopier;
use super::events::EventNotifier;
use super::fixup::FixupError;
use super::progress::DescriptorProgress;
use super::scheduler::{Dependency, ScheduleError, Scheduler, task_error, when_all};
use super::{Fetcher, Resolver, fetch_all};
use crate::types::{Descriptor, Digest, ImageRef, media_types};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const ACTION_SKIP_PRESENT: &str = "Skip (already present)";
pub const ACTION_SKIP_DUPLICATE: &str = "Skip (duplicate)";

/// Child references carried by an image manifest or an index.
#[derive(Debug, Default, Deserialize)]
struct ManifestChildren {
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

struct CopyTask {
    node: Arc<DescriptorProgress>,
    depth: usize,
}

pub(crate) struct ManifestWalker<'a> {
    resolver: &'a dyn Resolver,
    source: Arc<dyn Fetcher>,
    copier: Arc<DescriptorCopier>,
    notifier: EventNotifier,
    target_repo: ImageRef,
    max_concurrent_jobs: usize,
    job_buffer_size: usize,
}

impl<'a> ManifestWalker<'a> {
    pub(crate) fn new(
        resolver: &'a dyn Resolver,
        source: Arc<dyn Fetcher>,
        copier: DescriptorCopier,
        notifier: EventNotifier,
        target_repo: ImageRef,
    ) -> Self {
        Self {
            resolver,
            source,
            copier: Arc::new(copier),
            notifier,
            target_repo,
            max_concurrent_jobs: super::fixup::DEFAULT_MAX_CONCURRENT_JOBS,
            job_buffer_size: super::fixup::DEFAULT_JOB_BUFFER_SIZE,
        }
    }

    pub(crate) fn concurrency(mut self, max_concurrent_jobs: usize, job_buffer_size: usize) -> Self {
        self.max_concurrent_jobs = max_concurrent_jobs;
        self.job_buffer_size = job_buffer_size;
        self
    }

    /// Copy `root` and everything it references into the target repository.
    ///
    /// `scheduled` holds digests already handed to a copy task; it is shared
    /// across the images of one bundle so a layer is only ever copied once.
    pub(crate) async fn walk(
        &self,
        ctx: &CancellationToken,
        root: &Descriptor,
        scheduled: &mut HashSet<Digest>,
    ) -> Result<(), FixupError> {
        if ctx.is_cancelled() {
            return Err(ScheduleError::Canceled.into());
        }

        let mut tasks = self.collect_copy_tasks(ctx, root, scheduled).await?;
        if tasks.is_empty() {
            return Ok(());
        }
        tracing::debug!(root = %root.digest, tasks = tasks.len(), "copy tasks collected");

        tasks.sort_by(|a, b| b.depth.cmp(&a.depth));
        for wave in tasks.chunk_by(|a, b| a.depth == b.depth) {
            self.run_wave(ctx, wave).await?;
        }
        Ok(())
    }

    /// Depth-first expansion from `root`; single-threaded, so `scheduled` needs no lock.
    async fn collect_copy_tasks(
        &self,
        ctx: &CancellationToken,
        root: &Descriptor,
        scheduled: &mut HashSet<Digest>,
    ) -> Result<Vec<CopyTask>, FixupError> {
        let mut tasks = Vec::new();
        let mut stack: Vec<(Descriptor, Option<Arc<DescriptorProgress>>, usize)> =
            vec![(root.clone(), None, 0)];

        while let Some((descriptor, parent, depth)) = stack.pop() {
            if ctx.is_cancelled() {
                return Err(ScheduleError::Canceled.into());
            }

            let node = DescriptorProgress::new(descriptor.clone());
            match parent {
                Some(parent) => parent.add_child(node.clone()),
                None => self.notifier.progress().add_root(node.clone()),
            }

            if !scheduled.insert(descriptor.digest.clone()) {
                node.set_action(ACTION_SKIP_DUPLICATE);
                node.mark_done();
                continue;
            }

            if descriptor.is_manifest() && self.present_in_target(&descriptor.digest).await {
                tracing::debug!(digest = %descriptor.digest, "manifest already present in target");
                node.set_action(ACTION_SKIP_PRESENT);
                node.mark_done();
                self.notifier.report_progress(None);
                continue;
            }

            tasks.push(CopyTask {
                node: node.clone(),
                depth,
            });

            let children = match self.children(&descriptor).await {
                Ok(children) => children,
                Err(e) => {
                    self.notifier.report_progress(Some(&e as &dyn std::error::Error));
                    return Err(e);
                }
            };
            // Reversed so the first child is visited first.
            for child in children.into_iter().rev() {
                stack.push((child, Some(node.clone()), depth + 1));
            }
        }
        Ok(tasks)
    }

    async fn present_in_target(&self, digest: &Digest) -> bool {
        let reference = format!("{}@{digest}", self.target_repo.name());
        self.resolver.resolve(&reference).await.is_ok()
    }

    async fn children(&self, descriptor: &Descriptor) -> Result<Vec<Descriptor>, FixupError> {
        let media_type = descriptor.media_type.as_str();
        if !media_types::is_image_manifest(media_type) && !media_types::is_index(media_type) {
            return Ok(Vec::new());
        }

        let payload = fetch_all(self.source.as_ref(), descriptor).await?;
        let parsed: ManifestChildren =
            serde_json::from_slice(&payload).map_err(|source| FixupError::InvalidManifest {
                digest: descriptor.digest.to_string(),
                source,
            })?;

        if media_types::is_index(media_type) {
            return Ok(parsed.manifests);
        }
        let mut children = Vec::with_capacity(parsed.layers.len() + 1);
        children.extend(parsed.config);
        children.extend(parsed.layers);
        Ok(children)
    }

    async fn run_wave(&self, ctx: &CancellationToken, wave: &[CopyTask]) -> Result<(), FixupError> {
        let scheduler = Scheduler::new(ctx, self.max_concurrent_jobs, self.job_buffer_size);
        let dependencies: Vec<Dependency> = wave
            .iter()
            .map(|task| {
                let copier = self.copier.clone();
                let node = task.node.clone();
                scheduler.schedule(move |ctx| async move {
                    copier.handle(&ctx, &node).await.map_err(task_error)
                })
            })
            .collect();

        match when_all(dependencies.clone()).wait().await {
            Ok(()) => Ok(()),
            Err(err) => Err(root_cause(err, &dependencies).await.into()),
        }
    }
}

/// Prefer the failure that triggered cancellation over the cancellations it caused.
async fn root_cause(err: ScheduleError, dependencies: &[Dependency]) -> ScheduleError {
    if !err.is_canceled() {
        return err;
    }
    for dependency in dependencies {
        if let Err(e) = dependency.wait().await
            && !e.is_canceled()
        {
            return e;
        }
    }
    err
}

// ABOUTME: Ordered resolution strategies that make an image resolvable in the target repository.
// ABOUTME: push-by-digest, relocation map, direct resolve, then push from the local image store.

use super::FixupError;
use crate::bundle::{BaseImage, RelocationMap};
use crate::image_client::{ImageClient, ImageClientError};
use crate::remotes::{RemoteError, Resolver};
use crate::types::{Descriptor, ImageRef, ParseImageRefError, media_types};
use std::fmt;

/// Where an image ended up and how to copy it there.
#[derive(Debug, Clone)]
pub(crate) struct FixupInfo {
    /// Target repository, without tag or digest.
    pub target_repo: ImageRef,
    /// Repository content is copied from; `None` when pushed straight from the local store.
    pub source_ref: Option<ImageRef>,
    pub descriptor: Descriptor,
}

#[derive(Debug)]
pub(crate) struct Resolution {
    pub info: FixupInfo,
    /// The image was pushed from the local store, so nothing is left to copy.
    pub pushed: bool,
}

/// Collaborators the strategies need.
pub(crate) struct StrategyEnv<'a> {
    pub target: &'a ImageRef,
    pub resolver: &'a dyn Resolver,
    pub image_client: Option<&'a dyn ImageClient>,
    pub relocation_map: &'a RelocationMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    PushByDigest,
    ResolveInRelocationMap,
    ResolveImage,
    PushLocalImage,
}

impl Strategy {
    /// Already-resolvable content wins over a local push.
    const ORDERED: [Strategy; 4] = [
        Strategy::PushByDigest,
        Strategy::ResolveInRelocationMap,
        Strategy::ResolveImage,
        Strategy::PushLocalImage,
    ];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::PushByDigest => "push-by-digest",
            Strategy::ResolveInRelocationMap => "resolve-in-relocation-map",
            Strategy::ResolveImage => "resolve-image",
            Strategy::PushLocalImage => "push-local-image",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
enum StrategyError {
    #[error("{context}: invalid {role} ref {reference}: {source}")]
    InvalidRef {
        context: &'static str,
        role: &'static str,
        reference: String,
        source: ParseImageRefError,
    },

    #[error("failed to resolve image {reference}: {source}")]
    Resolve {
        reference: String,
        source: RemoteError,
    },

    #[error("failed to push digested image {image}@{digest} to target {target}: {source}")]
    PushDigested {
        image: String,
        digest: String,
        target: String,
        source: PushError,
    },

    #[error("failed to push local image {image}: {source}")]
    PushLocal { image: String, source: PushError },
}

#[derive(Debug, thiserror::Error)]
enum PushError {
    #[error("failed to push image \"{image}\", make sure the image exists locally: {source}")]
    Tag {
        image: String,
        source: ImageClientError,
    },

    #[error("failed to push image \"{image}\": {source}")]
    Push {
        image: String,
        source: ImageClientError,
    },

    #[error("failed to resolve \"{reference}\" after pushing it: {source}")]
    Resolve {
        reference: String,
        source: RemoteError,
    },
}

/// Validate the base image, then try each strategy until one handles it.
pub(crate) async fn fixup_base_image(
    env: &StrategyEnv<'_>,
    name: &str,
    base: &BaseImage,
) -> Result<Resolution, FixupError> {
    check_base_image(base).map_err(|reason| FixupError::InvalidImage {
        image: base.image.clone(),
        service: name.to_string(),
        reason,
    })?;

    let target_repo = env.target.repository();
    let mut causes = Vec::new();
    for strategy in Strategy::ORDERED {
        match attempt(strategy, env, &target_repo, base).await {
            Ok(Some(resolution)) => {
                tracing::debug!(image = %base.image, %strategy, "image resolved");
                return Ok(resolution);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(image = %base.image, %strategy, error = %e, "strategy failed");
                causes.push(format!(
                    "failed to fixup the image {} for service \"{name}\": {e}",
                    base.image
                ));
            }
        }
    }
    Err(FixupError::AllStrategiesFailed(causes))
}

async fn attempt(
    strategy: Strategy,
    env: &StrategyEnv<'_>,
    target_repo: &ImageRef,
    base: &BaseImage,
) -> Result<Option<Resolution>, StrategyError> {
    match strategy {
        Strategy::PushByDigest => {
            let Some(client) = env.image_client else {
                return Ok(None);
            };
            if !base.image.is_empty() {
                return Ok(None);
            }
            let descriptor = push_image_to_target(env, client, &base.digest)
                .await
                .map_err(|source| StrategyError::PushDigested {
                    image: base.image.clone(),
                    digest: base.digest.clone(),
                    target: target_repo.to_string(),
                    source,
                })?;
            Ok(Some(Resolution {
                info: FixupInfo {
                    target_repo: target_repo.clone(),
                    source_ref: None,
                    descriptor,
                },
                pushed: true,
            }))
        }

        Strategy::ResolveInRelocationMap => {
            const CONTEXT: &str = "failed to resolve image in relocation map";
            let source_ref = normalized_ref(&base.image, CONTEXT, "source")?;
            let Some(relocated) = env.relocation_map.get(&base.image) else {
                return Ok(None);
            };
            let relocated_ref = normalized_ref(relocated, CONTEXT, "target")?;
            let reference = relocated_ref.to_string();
            let (_, descriptor) = env
                .resolver
                .resolve(&reference)
                .await
                .map_err(|source| StrategyError::Resolve { reference, source })?;
            Ok(Some(Resolution {
                info: FixupInfo {
                    target_repo: target_repo.clone(),
                    source_ref: Some(source_ref),
                    descriptor,
                },
                pushed: false,
            }))
        }

        Strategy::ResolveImage => {
            let source_ref = normalized_ref(&base.image, "failed to resolve image", "source")?;
            let reference = source_ref.to_string();
            let (_, descriptor) = env
                .resolver
                .resolve(&reference)
                .await
                .map_err(|source| StrategyError::Resolve { reference, source })?;
            Ok(Some(Resolution {
                info: FixupInfo {
                    target_repo: target_repo.clone(),
                    source_ref: Some(source_ref),
                    descriptor,
                },
                pushed: false,
            }))
        }

        Strategy::PushLocalImage => {
            let Some(client) = env.image_client else {
                return Ok(None);
            };
            let source_ref = normalized_ref(&base.image, "failed to push local image", "source")?;
            let descriptor = push_image_to_target(env, client, &base.image)
                .await
                .map_err(|source| StrategyError::PushLocal {
                    image: base.image.clone(),
                    source,
                })?;
            Ok(Some(Resolution {
                info: FixupInfo {
                    target_repo: target_repo.clone(),
                    source_ref: Some(source_ref),
                    descriptor,
                },
                pushed: true,
            }))
        }
    }
}

/// Registries cannot receive an image by digest alone, so the local image is
/// tagged into the target repository, pushed, and the tag resolved afterwards.
async fn push_image_to_target(
    env: &StrategyEnv<'_>,
    client: &dyn ImageClient,
    source: &str,
) -> Result<Descriptor, PushError> {
    let tagged = env.target.clone().with_default_tag();

    client
        .tag(source, &tagged)
        .await
        .map_err(|e| PushError::Tag {
            image: source.to_string(),
            source: e,
        })?;
    client.push(&tagged).await.map_err(|e| PushError::Push {
        image: source.to_string(),
        source: e,
    })?;

    let reference = tagged.to_string();
    let (_, descriptor) = env
        .resolver
        .resolve(&reference)
        .await
        .map_err(|source| PushError::Resolve { reference, source })?;
    Ok(descriptor)
}

fn normalized_ref(
    reference: &str,
    context: &'static str,
    role: &'static str,
) -> Result<ImageRef, StrategyError> {
    ImageRef::parse(reference)
        .map(ImageRef::with_default_tag)
        .map_err(|source| StrategyError::InvalidRef {
            context,
            role,
            reference: reference.to_string(),
            source,
        })
}

/// Reject base images that no strategy could ever handle.
pub(crate) fn check_base_image(base: &BaseImage) -> Result<(), String> {
    match base.image_type.as_str() {
        "" | "docker" | "oci" => {}
        other => return Err(format!("image type {other:?} is not supported")),
    }
    if !base.media_type.is_empty() && !media_types::is_supported_base_image(&base.media_type) {
        return Err(format!("image media type {:?} is not supported", base.media_type));
    }
    if !base.image.is_empty() {
        ImageRef::parse(&base.image).map_err(|e| e.to_string())?;
    }
    Ok(())
}

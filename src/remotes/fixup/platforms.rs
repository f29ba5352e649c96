// ABOUTME: Rewrites multi-platform indexes down to the entries a platform filter accepts.
// ABOUTME: Unknown index and descriptor fields survive the rewrite untouched.

use super::FixupError;
use crate::remotes::{LocalContentFetcher, fetch_all};
use crate::types::{Descriptor, ImageRef, Platform, PlatformMatcher, media_types};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Index or manifest list decoded only as far as filtering needs.
#[derive(Debug, Serialize, Deserialize)]
struct TypelessIndex {
    #[serde(default)]
    manifests: Vec<Map<String, Value>>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

fn entry_platform(entry: &Map<String, Value>) -> Option<Platform> {
    entry
        .get("platform")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

/// Filter `descriptor`'s index in place, leaving single-platform manifests alone.
///
/// On success `descriptor` points at the rewritten index, which `fetcher`
/// serves from memory from then on.
pub(crate) async fn fixup_platforms(
    descriptor: &mut Descriptor,
    source_ref: &ImageRef,
    fetcher: &LocalContentFetcher,
    filter: &dyn PlatformMatcher,
) -> Result<(), FixupError> {
    if descriptor.media_type != media_types::OCI_INDEX
        && descriptor.media_type != media_types::DOCKER_MANIFEST_LIST
    {
        return Ok(());
    }
    tracing::debug!(image = %source_ref, "filtering index platforms");

    let payload = fetch_all(fetcher, descriptor).await?;
    let mut index: TypelessIndex =
        serde_json::from_slice(&payload).map_err(|source| FixupError::InvalidManifest {
            digest: descriptor.digest.to_string(),
            source,
        })?;

    index.manifests.retain(|entry| {
        entry_platform(entry).is_some_and(|platform| filter.matches(&platform))
    });
    if index.manifests.is_empty() {
        return Err(FixupError::NoMatchingPlatform {
            source_ref: source_ref.to_string(),
        });
    }

    let filtered = serde_json::to_vec(&index).map_err(|source| FixupError::InvalidManifest {
        digest: descriptor.digest.to_string(),
        source,
    })?;
    descriptor.size = filtered.len() as u64;
    descriptor.digest = fetcher.add(filtered);
    Ok(())
}

// ABOUTME: Content descriptor pointing at a manifest, config, or layer blob.
// ABOUTME: Serializes with the OCI field names so it can be embedded in manifests.

use super::{Digest, Platform, media_types};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content-addressed reference to a blob or manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            urls: Vec::new(),
            annotations: BTreeMap::new(),
            platform: None,
        }
    }

    /// Descriptor for an in-memory payload.
    pub fn for_payload(media_type: impl Into<String>, payload: &[u8]) -> Self {
        Self::new(media_type, Digest::from_bytes(payload), payload.len() as u64)
    }

    pub fn is_manifest(&self) -> bool {
        media_types::is_manifest(&self.media_type)
    }

    pub fn is_index(&self) -> bool {
        media_types::is_index(&self.media_type)
    }

    /// Foreign layers carry download URLs and are never copied between registries.
    pub fn is_foreign(&self) -> bool {
        !self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_oci_field_names() {
        let desc = Descriptor::for_payload(media_types::OCI_MANIFEST, b"{}");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["mediaType"], media_types::OCI_MANIFEST);
        assert_eq!(json["size"], 2);
        assert!(json.get("urls").is_none());
        assert!(json.get("platform").is_none());
    }

    #[test]
    fn foreign_layer_detection() {
        let mut desc = Descriptor::for_payload("application/octet-stream", b"layer");
        assert!(!desc.is_foreign());
        desc.urls.push("https://example.com/layer".into());
        assert!(desc.is_foreign());
    }
}

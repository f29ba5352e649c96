// ABOUTME: Well-known manifest media types for Docker and OCI images.
// ABOUTME: Classifies descriptors as manifests, indexes, or plain blobs.

pub const DOCKER_SCHEMA1_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const DOCKER_SCHEMA2_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Media types accepted when resolving or fetching a manifest.
pub const MANIFEST_ACCEPT: [&str; 5] = [
    OCI_INDEX,
    OCI_MANIFEST,
    DOCKER_MANIFEST_LIST,
    DOCKER_SCHEMA2_MANIFEST,
    DOCKER_SCHEMA1_MANIFEST,
];

/// Whether the media type is any manifest-class type (pushed whole, never mounted).
pub fn is_manifest(media_type: &str) -> bool {
    MANIFEST_ACCEPT.contains(&media_type)
}

/// Whether the media type lists per-platform sub-manifests.
pub fn is_index(media_type: &str) -> bool {
    media_type == OCI_INDEX || media_type == DOCKER_MANIFEST_LIST
}

/// Whether the media type is a single-image manifest with config and layers.
pub fn is_image_manifest(media_type: &str) -> bool {
    media_type == OCI_MANIFEST || media_type == DOCKER_SCHEMA2_MANIFEST
}

/// Media types a bundle may pin on a base image (empty means unpinned).
pub fn is_supported_base_image(media_type: &str) -> bool {
    media_type.is_empty()
        || media_type == OCI_MANIFEST
        || media_type == OCI_INDEX
        || media_type == DOCKER_SCHEMA2_MANIFEST
        || media_type == DOCKER_MANIFEST_LIST
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_manifest_types() {
        assert!(is_manifest(OCI_INDEX));
        assert!(is_manifest(DOCKER_SCHEMA1_MANIFEST));
        assert!(!is_manifest("application/vnd.oci.image.layer.v1.tar+gzip"));
        assert!(is_index(DOCKER_MANIFEST_LIST));
        assert!(!is_index(OCI_MANIFEST));
        assert!(is_image_manifest(DOCKER_SCHEMA2_MANIFEST));
    }

    #[test]
    fn schema1_is_not_a_supported_pin() {
        assert!(is_supported_base_image(""));
        assert!(!is_supported_base_image(DOCKER_SCHEMA1_MANIFEST));
    }
}

// ABOUTME: Integration tests for references, digests, descriptors, and platforms.
// ABOUTME: Covers normalization rules and parser properties.

use cnab_oci::types::*;
use proptest::prelude::*;

const EMPTY_SHA256: &str =
    "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

mod image_ref_tests {
    use super::*;

    #[test]
    fn short_name_expands_to_docker_hub_library() {
        let img = ImageRef::parse("nginx").unwrap();
        assert_eq!(img.domain(), "docker.io");
        assert_eq!(img.path(), "library/nginx");
        assert_eq!(img.tag(), None);
        assert_eq!(img.familiar_name(), "nginx");
        assert_eq!(img.to_string(), "docker.io/library/nginx");
    }

    #[test]
    fn legacy_index_domain_is_docker_hub() {
        let img = ImageRef::parse("index.docker.io/org/app:1").unwrap();
        assert_eq!(img.domain(), "docker.io");
        assert_eq!(img.path(), "org/app");
        assert_eq!(img.familiar_name(), "org/app");
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let img = ImageRef::parse("localhost:5000/app").unwrap();
        assert_eq!(img.domain(), "localhost:5000");
        assert_eq!(img.path(), "app");
        assert_eq!(img.tag(), None);

        let tagged = ImageRef::parse("localhost:5000/app:v2").unwrap();
        assert_eq!(tagged.tag(), Some("v2"));
    }

    #[test]
    fn tag_and_digest_are_both_kept() {
        let input = format!("ghcr.io/org/app:v1@{EMPTY_SHA256}");
        let img = ImageRef::parse(&input).unwrap();
        assert_eq!(img.tag(), Some("v1"));
        assert_eq!(img.digest().map(Digest::as_str), Some(EMPTY_SHA256));
        assert_eq!(img.to_string(), input);
    }

    #[test]
    fn default_tag_only_without_digest() {
        let img = ImageRef::parse("ghcr.io/org/app").unwrap().with_default_tag();
        assert_eq!(img.tag(), Some(DEFAULT_TAG));

        let pinned = ImageRef::parse(&format!("ghcr.io/org/app@{EMPTY_SHA256}"))
            .unwrap()
            .with_default_tag();
        assert_eq!(pinned.tag(), None);
    }

    #[test]
    fn repository_drops_tag_and_digest() {
        let img = ImageRef::parse(&format!("ghcr.io/org/app:v1@{EMPTY_SHA256}")).unwrap();
        assert_eq!(img.repository().to_string(), "ghcr.io/org/app");
        assert!(img.same_repository(&ImageRef::parse("ghcr.io/org/app:other").unwrap()));
        assert!(!img.same_repository(&ImageRef::parse("ghcr.io/org/other").unwrap()));
    }

    #[test]
    fn with_digest_pins_a_tagged_reference() {
        let digest = Digest::parse(EMPTY_SHA256).unwrap();
        let img = ImageRef::parse("ghcr.io/org/app:v1").unwrap().with_digest(digest);
        assert_eq!(img.to_string(), format!("ghcr.io/org/app:v1@{EMPTY_SHA256}"));
    }

    #[test]
    fn rejects_malformed_references() {
        assert!(matches!(ImageRef::parse(""), Err(ParseImageRefError::Empty)));
        assert!(matches!(
            ImageRef::parse("app with space"),
            Err(ParseImageRefError::InvalidChar(' '))
        ));
        assert!(matches!(
            ImageRef::parse("ghcr.io/Org/app"),
            Err(ParseImageRefError::NotLowercase(_))
        ));
        assert!(matches!(
            ImageRef::parse("app:-bad"),
            Err(ParseImageRefError::InvalidTag(_))
        ));
        assert!(matches!(
            ImageRef::parse("app@sha256:abc"),
            Err(ParseImageRefError::InvalidDigest(_))
        ));
        assert!(ImageRef::parse("ghcr.io/org//app").is_err());
    }
}

mod digest_tests {
    use super::*;

    #[test]
    fn parses_algorithm_and_encoded_parts() {
        let digest = Digest::parse(EMPTY_SHA256).unwrap();
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.encoded().len(), 64);
        assert_eq!(digest.to_string(), EMPTY_SHA256);
    }

    #[test]
    fn empty_payload_has_the_well_known_digest() {
        assert_eq!(Digest::from_bytes(b"").as_str(), EMPTY_SHA256);
    }

    #[test]
    fn descriptor_for_payload_records_size_and_digest() {
        let payload = br#"{"schemaVersion":2}"#;
        let desc = Descriptor::for_payload(media_types::OCI_MANIFEST, payload);
        assert_eq!(desc.size, payload.len() as u64);
        assert_eq!(desc.digest, Digest::from_bytes(payload));
        assert!(desc.is_manifest());
        assert!(!desc.is_index());
    }
}

mod platform_tests {
    use super::*;

    #[test]
    fn aliases_normalize_to_the_same_platform() {
        assert_eq!(
            Platform::parse("linux/x86_64").unwrap(),
            Platform::parse("linux/amd64").unwrap()
        );
        assert_eq!(
            Platform::parse("linux/aarch64").unwrap(),
            Platform::parse("linux/arm64/v8").unwrap()
        );
        assert_eq!(
            Platform::parse("linux/arm").unwrap().variant.as_deref(),
            Some("v7")
        );
    }

    #[test]
    fn filter_matches_manifest_entries_with_any_variant() {
        let filter = PlatformFilter::parse(&["linux/arm64", "windows/amd64"]).unwrap();
        let entry = Platform::new("linux", "aarch64", Some("v8"));
        assert!(filter.matches(&entry));
        assert!(!filter.matches(&Platform::new("linux", "amd64", None)));
        assert_eq!(filter.to_string(), "linux/arm64,windows/amd64");
    }

    #[test]
    fn empty_filter_is_an_error() {
        let specs: [&str; 0] = [];
        assert_eq!(
            PlatformFilter::parse(&specs),
            Err(ParsePlatformError::NoPlatforms)
        );
    }
}

proptest! {
    #[test]
    fn image_ref_display_reparses_to_itself(
        domain in prop_oneof![Just("docker.io"), Just("ghcr.io"), Just("localhost:5000")],
        repo in "[a-z0-9]{1,10}(/[a-z0-9]{1,10}){0,2}",
        tag in proptest::option::of("[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,20}"),
    ) {
        let mut input = format!("{domain}/{repo}");
        if let Some(tag) = &tag {
            input = format!("{input}:{tag}");
        }
        let parsed = ImageRef::parse(&input).unwrap();
        let reparsed = ImageRef::parse(&parsed.to_string()).unwrap();
        prop_assert_eq!(&parsed, &reparsed);
        prop_assert_eq!(parsed.tag(), tag.as_deref());
    }

    #[test]
    fn image_ref_parse_never_panics(input in "\\PC{0,64}") {
        let _ = ImageRef::parse(&input);
    }

    #[test]
    fn platform_display_is_a_fixed_point(
        os in "[a-z]{1,8}",
        arch in prop_oneof![Just("amd64"), Just("x86_64"), Just("arm64"), Just("aarch64"), Just("arm"), Just("386"), Just("s390x")],
        variant in proptest::option::of(prop_oneof![Just("v6"), Just("v7"), Just("v8")]),
    ) {
        let spec = match variant {
            Some(v) => format!("{os}/{arch}/{v}"),
            None => format!("{os}/{arch}"),
        };
        let platform = Platform::parse(&spec).unwrap();
        prop_assert_eq!(Platform::parse(&platform.to_string()).unwrap(), platform);
    }
}

// ABOUTME: Validated domain types for content addressing and image references.
// ABOUTME: Digests, descriptors, platforms, media types, and normalized image refs.

mod descriptor;
mod digest;
mod image_ref;
pub mod media_types;
mod platform;

pub use descriptor::Descriptor;
pub use digest::{Digest, Digester, ParseDigestError};
pub use image_ref::{DEFAULT_DOMAIN, DEFAULT_TAG, ImageRef, ParseImageRefError};
pub use platform::{ParsePlatformError, Platform, PlatformFilter, PlatformMatcher};

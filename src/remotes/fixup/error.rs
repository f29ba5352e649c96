// ABOUTME: Error types for bundle and image fixup.
// ABOUTME: Covers configuration, resolution, consistency, copy, and platform filtering failures.

use crate::remotes::{RemoteError, ScheduleError};

#[derive(Debug, thiserror::Error)]
pub enum FixupError {
    #[error("only one invocation image supported for bundle \"{target}\"")]
    MultipleInvocationImages { target: String },

    #[error("invalid image \"{image}\" for service \"{service}\": {reason}")]
    InvalidImage {
        image: String,
        service: String,
        reason: String,
    },

    /// Every resolution strategy failed; causes are listed in order tried.
    #[error("{}", render_causes(.0))]
    AllStrategiesFailed(Vec<String>),

    #[error("image \"{image}\" digest differs \"{expected}\" after fixup: \"{actual}\"")]
    DigestDiffers {
        image: String,
        expected: String,
        actual: String,
    },

    #[error("image \"{image}\" size differs {expected} after fixup: {actual}")]
    SizeDiffers {
        image: String,
        expected: u64,
        actual: u64,
    },

    #[error("image \"{image}\" media type differs \"{expected}\" after fixup: \"{actual}\"")]
    MediaTypeDiffers {
        image: String,
        expected: String,
        actual: String,
    },

    #[error("no descriptor matching the platform filter found in \"{source_ref}\"")]
    NoMatchingPlatform { source_ref: String },

    #[error("invalid manifest {digest}: {source}")]
    InvalidManifest {
        digest: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid fixup configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Copy(#[from] ScheduleError),
}

fn render_causes(causes: &[String]) -> String {
    let mut out = format!("{} error(s) occurred:", causes.len());
    for (i, cause) in causes.iter().enumerate() {
        out.push_str(&format!("\n  {}. {cause}", i + 1));
    }
    out
}

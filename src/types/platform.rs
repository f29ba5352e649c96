// ABOUTME: Image platform specifiers and platform matching.
// ABOUTME: Parses os/arch/variant strings and filters multi-arch manifest entries.

use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParsePlatformError {
    #[error("platform specifier cannot be empty")]
    Empty,

    #[error("invalid platform specifier {0:?}: expected os[/arch[/variant]]")]
    InvalidFormat(String),

    #[error("invalid character in platform specifier {spec:?}: '{c}'")]
    InvalidChar { spec: String, c: char },

    #[error("platform filter requires at least one platform")]
    NoPlatforms,
}

/// Platform of a sub-manifest inside an index or manifest list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(rename = "os.features", default, skip_serializing_if = "Vec::is_empty")]
    pub os_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: &str, architecture: &str, variant: Option<&str>) -> Self {
        Self {
            architecture: architecture.to_string(),
            os: os.to_string(),
            variant: variant.map(str::to_string),
            ..Default::default()
        }
    }

    /// Parse an `os[/arch[/variant]]` specifier.
    ///
    /// A bare os defaults the architecture to `amd64`. Architecture aliases are
    /// normalized so `linux/x86_64` and `linux/amd64` compare equal.
    pub fn parse(spec: &str) -> Result<Self, ParsePlatformError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(ParsePlatformError::Empty);
        }

        if let Some(c) = spec
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '/' | '_' | '-' | '.'))
        {
            return Err(ParsePlatformError::InvalidChar {
                spec: spec.to_string(),
                c,
            });
        }

        let lowered = spec.to_ascii_lowercase();
        let parts: Vec<&str> = lowered.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ParsePlatformError::InvalidFormat(spec.to_string()));
        }

        let platform = match parts.as_slice() {
            [os] => Self::new(os, "amd64", None),
            [os, arch] => Self::new(os, arch, None),
            [os, arch, variant] => Self::new(os, arch, Some(variant)),
            _ => return Err(ParsePlatformError::InvalidFormat(spec.to_string())),
        };

        Ok(platform.normalize())
    }

    /// Normalize architecture aliases and default variants.
    pub fn normalize(mut self) -> Self {
        self.os = self.os.to_ascii_lowercase();
        let (arch, variant) = normalize_arch(&self.architecture, self.variant.as_deref());
        self.architecture = arch;
        self.variant = variant;
        self
    }
}

fn normalize_arch(arch: &str, variant: Option<&str>) -> (String, Option<String>) {
    let arch = arch.to_ascii_lowercase();
    let variant = variant.map(str::to_ascii_lowercase);
    match arch.as_str() {
        "i386" => ("386".into(), None),
        "x86_64" | "x86-64" | "amd64" => match variant.as_deref() {
            Some("v1") => ("amd64".into(), None),
            _ => ("amd64".into(), variant),
        },
        "aarch64" | "arm64" => match variant.as_deref() {
            Some("8") | Some("v8") => ("arm64".into(), None),
            _ => ("arm64".into(), variant),
        },
        "armhf" => ("arm".into(), Some("v7".into())),
        "armel" => ("arm".into(), Some("v6".into())),
        "arm" => match variant.as_deref() {
            None | Some("7") => ("arm".into(), Some("v7".into())),
            Some("5") | Some("6") | Some("8") => {
                ("arm".into(), variant.map(|v| format!("v{v}")))
            }
            _ => ("arm".into(), variant),
        },
        _ => (arch, variant),
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(ref variant) = self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

impl FromStr for Platform {
    type Err = ParsePlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Decides whether a manifest entry's platform should be kept.
pub trait PlatformMatcher: Send + Sync {
    fn matches(&self, platform: &Platform) -> bool;
}

impl PlatformMatcher for Platform {
    /// OS and architecture must be equal after normalization. A matcher without
    /// a variant accepts any variant.
    fn matches(&self, platform: &Platform) -> bool {
        let candidate = platform.clone().normalize();
        self.os == candidate.os
            && self.architecture == candidate.architecture
            && (self.variant.is_none() || self.variant == candidate.variant)
    }
}

/// Matches a platform if any of its candidates match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformFilter(NonEmpty<Platform>);

impl PlatformFilter {
    pub fn new(platforms: NonEmpty<Platform>) -> Self {
        Self(platforms)
    }

    /// Parse a list of `os[/arch[/variant]]` specifiers.
    pub fn parse<S: AsRef<str>>(specs: &[S]) -> Result<Self, ParsePlatformError> {
        let platforms = specs
            .iter()
            .map(|s| Platform::parse(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        NonEmpty::from_vec(platforms)
            .map(Self)
            .ok_or(ParsePlatformError::NoPlatforms)
    }

    pub fn platforms(&self) -> &NonEmpty<Platform> {
        &self.0
    }
}

impl PlatformMatcher for PlatformFilter {
    fn matches(&self, platform: &Platform) -> bool {
        self.0.iter().any(|candidate| candidate.matches(platform))
    }
}

impl fmt::Display for PlatformFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", names.join(","))
    }
}

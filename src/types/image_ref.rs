// ABOUTME: Container image reference parsing and normalization.
// ABOUTME: Handles nginx, nginx:tag, registry:port/ns/image:tag@digest with Docker Hub defaults.

use super::{Digest, ParseDigestError};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_DOMAIN: &str = "docker.io";
const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";
pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Error)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0}")]
    InvalidChar(char),

    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),

    #[error("repository name must be lowercase: {0}")]
    NotLowercase(String),

    #[error("invalid tag: {0}")]
    InvalidTag(String),

    #[error("invalid digest in reference: {0}")]
    InvalidDigest(#[from] ParseDigestError),
}

/// A normalized image reference.
///
/// `nginx` normalizes to `docker.io/library/nginx`, mirroring how registries
/// and the Docker CLI interpret short names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    domain: String,
    path: String,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }

        for c in input.chars() {
            if !c.is_ascii_alphanumeric() && !matches!(c, '/' | ':' | '.' | '-' | '_' | '@') {
                return Err(ParseImageRefError::InvalidChar(c));
            }
        }

        let (without_digest, digest) = match input.split_once('@') {
            Some((before, after)) => (before, Some(Digest::parse(after)?)),
            None => (input, None),
        };

        // A colon after the last slash introduces a tag; earlier ones are ports.
        let last_slash = without_digest.rfind('/');
        let (name, tag) = match without_digest.rfind(':') {
            Some(colon) if last_slash.is_none_or(|slash| colon > slash) => (
                &without_digest[..colon],
                Some(without_digest[colon + 1..].to_string()),
            ),
            _ => (without_digest, None),
        };

        if let Some(ref tag) = tag {
            validate_tag(tag)?;
        }

        let (domain, path) = split_domain(name)?;

        Ok(Self {
            domain,
            path,
            tag,
            digest,
        })
    }

    /// Registry host, e.g. `docker.io` or `localhost:5000`.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Repository path inside the registry, e.g. `library/nginx`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fully qualified repository name without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }

    /// Shortest form the Docker CLI would display (`nginx` for official images).
    pub fn familiar_name(&self) -> String {
        if self.domain != DEFAULT_DOMAIN {
            return self.name();
        }
        match self.path.strip_prefix(OFFICIAL_REPO_PREFIX) {
            Some(rest) if !rest.contains('/') => rest.to_string(),
            _ => self.path.clone(),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// The repository alone, with tag and digest stripped.
    pub fn repository(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            path: self.path.clone(),
            tag: None,
            digest: None,
        }
    }

    /// Add the `latest` tag when the reference carries neither tag nor digest.
    pub fn with_default_tag(mut self) -> Self {
        if self.tag.is_none() && self.digest.is_none() {
            self.tag = Some(DEFAULT_TAG.to_string());
        }
        self
    }

    pub fn with_digest(&self, digest: Digest) -> Self {
        Self {
            digest: Some(digest),
            ..self.clone()
        }
    }

    /// Whether both references point into the same repository.
    pub fn same_repository(&self, other: &ImageRef) -> bool {
        self.domain == other.domain && self.path == other.path
    }
}

fn validate_tag(tag: &str) -> Result<(), ParseImageRefError> {
    let mut chars = tag.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid_first || !valid_rest || tag.len() > 128 {
        return Err(ParseImageRefError::InvalidTag(tag.to_string()));
    }
    Ok(())
}

fn split_domain(name: &str) -> Result<(String, String), ParseImageRefError> {
    if name.is_empty() || name.starts_with('/') || name.ends_with('/') {
        return Err(ParseImageRefError::InvalidFormat(name.to_string()));
    }

    // The first component is a registry host if it looks like one.
    let (domain, path) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.')
                || first.contains(':')
                || first == "localhost"
                || first.chars().any(|c| c.is_ascii_uppercase()) =>
        {
            (first.to_string(), rest.to_string())
        }
        _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
    };

    let domain = if domain == LEGACY_DEFAULT_DOMAIN {
        DEFAULT_DOMAIN.to_string()
    } else {
        domain
    };

    let path = if domain == DEFAULT_DOMAIN && !path.contains('/') {
        format!("{OFFICIAL_REPO_PREFIX}{path}")
    } else {
        path
    };

    for component in path.split('/') {
        if component.is_empty()
            || component.starts_with(['.', '_', '-'])
            || component.ends_with(['.', '_', '-'])
        {
            return Err(ParseImageRefError::InvalidFormat(name.to_string()));
        }
        if component.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(ParseImageRefError::NotLowercase(name.to_string()));
        }
    }

    Ok((domain, path))
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for ImageRef {
    type Err = ParseImageRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ABOUTME: CNAB bundle model limited to the image records fixup reads and writes.
// ABOUTME: Unknown bundle fields are preserved so a fixed bundle round-trips through JSON.

mod relocation;

pub use relocation::RelocationMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("failed to read bundle {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write bundle {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid bundle JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Image type recorded on a base image when the bundle leaves it empty.
pub const DEFAULT_IMAGE_TYPE: &str = "oci";

/// Image fields shared by invocation images and component images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseImage {
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    #[serde(rename = "contentDigest", default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_zero(size: &u64) -> bool {
    *size == 0
}

impl BaseImage {
    pub fn new(image: impl Into<String>, image_type: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            image_type: image_type.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationImage {
    #[serde(flatten)]
    pub base: BaseImage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    #[serde(flatten)]
    pub base: BaseImage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default)]
    pub invocation_images: Vec<InvocationImage>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, Image>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Bundle {
    pub fn from_json(json: &str) -> Result<Self, BundleError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, BundleError> {
        let content = std::fs::read_to_string(path).map_err(|source| BundleError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn to_json_pretty(&self) -> Result<String, BundleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), BundleError> {
        let json = self.to_json_pretty()?;
        std::fs::write(path, json).map_err(|source| BundleError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// Bundle name, if the bundle declares one.
    pub fn name(&self) -> Option<&str> {
        self.extra.get("name").and_then(Value::as_str)
    }
}

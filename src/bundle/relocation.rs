// ABOUTME: Relocation map from original image references to digested target references.
// ABOUTME: Grows one entry per fixed-up image; later writes for the same key win.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::BundleError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelocationMap(BTreeMap<String, String>);

impl RelocationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, original: &str) -> Option<&str> {
        self.0.get(original).map(String::as_str)
    }

    pub fn insert(&mut self, original: impl Into<String>, relocated: impl Into<String>) {
        self.0.insert(original.into(), relocated.into());
    }

    pub fn contains(&self, original: &str) -> bool {
        self.0.contains_key(original)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn load(path: &Path) -> Result<Self, BundleError> {
        let content = std::fs::read_to_string(path).map_err(|source| BundleError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), BundleError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| BundleError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

impl FromIterator<(String, String)> for RelocationMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let mut map = RelocationMap::new();
        map.insert("nginx", "registry/ns/app@sha256:1");
        map.insert("nginx", "registry/ns/app@sha256:2");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("nginx"), Some("registry/ns/app@sha256:2"));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relocation.json");
        let map: RelocationMap = [("a".to_string(), "b".to_string())].into_iter().collect();
        map.save(&path).unwrap();
        assert_eq!(RelocationMap::load(&path).unwrap(), map);
    }
}

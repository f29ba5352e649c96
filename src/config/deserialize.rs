// ABOUTME: Custom serde deserializers for settings types.
// ABOUTME: Validates platform lists and registry host names while parsing.

use crate::types::{Platform, PlatformFilter};
use nonempty::NonEmpty;
use serde::Deserialize;

pub fn deserialize_platform_filter<'de, D>(deserializer: D) -> Result<Option<PlatformFilter>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let specs: Option<Vec<String>> = Option::deserialize(deserializer)?;
    let Some(specs) = specs else {
        return Ok(None);
    };
    let platforms = specs
        .iter()
        .map(|s| Platform::parse(s))
        .collect::<Result<Vec<_>, _>>()
        .map_err(serde::de::Error::custom)?;
    let platforms = NonEmpty::from_vec(platforms)
        .ok_or_else(|| serde::de::Error::custom("platform list cannot be empty"))?;
    Ok(Some(PlatformFilter::new(platforms)))
}

pub fn deserialize_registry_hosts<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let hosts: Vec<String> = Vec::deserialize(deserializer)?;
    hosts
        .into_iter()
        .map(|host| {
            let host = host.trim().trim_end_matches('/').to_string();
            if host.is_empty() || host.contains("://") || host.contains('/') {
                Err(serde::de::Error::custom(format!(
                    "invalid registry host {host:?}: expected host[:port]"
                )))
            } else {
                Ok(host)
            }
        })
        .collect()
}

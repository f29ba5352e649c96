// ABOUTME: Settings file types and parsing for cnab-oci.yml.
// ABOUTME: Registry transport policy, credentials with env interpolation, default platforms and concurrency.

mod deserialize;
mod env_value;

pub use env_value::{EnvValue, interpolate};

use crate::error::{Error, Result};
use crate::remotes::fixup::{DEFAULT_JOB_BUFFER_SIZE, DEFAULT_MAX_CONCURRENT_JOBS};
use crate::types::PlatformFilter;
use deserialize::{deserialize_platform_filter, deserialize_registry_hosts};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "cnab-oci.yml";
pub const CONFIG_FILENAME_ALT: &str = "cnab-oci.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".cnab-oci/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Registries reached over plain HTTP.
    #[serde(default, deserialize_with = "deserialize_registry_hosts")]
    pub insecure_registries: Vec<String>,

    /// Credentials keyed by registry host.
    #[serde(default)]
    pub credentials: HashMap<String, RegistryCredentials>,

    /// Timeout applied to every registry request.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default)]
    pub platforms: PlatformSettings,

    #[serde(default)]
    pub concurrency: ConcurrencySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformSettings {
    #[serde(default, deserialize_with = "deserialize_platform_filter")]
    pub invocation: Option<PlatformFilter>,

    #[serde(default, deserialize_with = "deserialize_platform_filter")]
    pub component: Option<PlatformFilter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencySettings {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    #[serde(default = "default_job_buffer_size")]
    pub job_buffer_size: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            job_buffer_size: DEFAULT_JOB_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryCredentials {
    pub username: EnvValue,
    pub password: EnvValue,
}

impl RegistryCredentials {
    pub fn resolve(&self) -> Result<Credentials> {
        Ok(Credentials {
            username: self.username.resolve()?,
            password: self.password.resolve()?,
        })
    }
}

/// Username and password with environment references resolved.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_concurrent_jobs() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}

fn default_job_buffer_size() -> usize {
    DEFAULT_JOB_BUFFER_SIZE
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            insecure_registries: Vec::new(),
            credentials: HashMap::new(),
            timeout: default_timeout(),
            platforms: PlatformSettings::default(),
            concurrency: ConcurrencySettings::default(),
        }
    }
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading settings");
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Discovered settings, or defaults when no settings file exists.
    pub fn discover_or_default(dir: &Path) -> Result<Self> {
        match Self::discover(dir) {
            Err(Error::ConfigNotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    /// Resolve every registry's credentials.
    pub fn resolve_credentials(&self) -> Result<HashMap<String, Credentials>> {
        self.credentials
            .iter()
            .map(|(host, creds)| creds.resolve().map(|c| (host.clone(), c)))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency.max_concurrent_jobs == 0 {
            return Err(Error::InvalidConfig(
                "concurrency.max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.concurrency.job_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "concurrency.job_buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

//! Configuration management for PulseSync

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheTtl;
use crate::error::{ConfigError, Result};
use crate::offline::OfflineConfig;
use crate::sync::{QueryOptions, RetryPolicy};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "PULSESYNC_CONFIG";
/// Environment variable overriding `api_url`
pub const API_URL_ENV: &str = "PULSESYNC_API_URL";
/// Environment variable overriding `api_key`
pub const API_KEY_ENV: &str = "PULSESYNC_API_KEY";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the remote data API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Anonymous API key sent with every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Tables the dashboard watches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<String>,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub offline: OfflineSettings,
}

/// Synced query timings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub poll_interval_secs: u64,
    pub stale_after_secs: u64,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    pub refetch_on_focus: bool,
    pub refetch_on_reconnect: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let options = QueryOptions::default();
        Self {
            poll_interval_secs: options.poll_interval.as_secs(),
            stale_after_secs: options.stale_after.as_secs(),
            max_retries: options.retry.max_retries,
            request_timeout_secs: options.request_timeout.as_secs(),
            refetch_on_focus: options.refetch_on_focus,
            refetch_on_reconnect: options.refetch_on_reconnect,
        }
    }
}

impl SyncSettings {
    /// Query options with these timings.
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            stale_after: Duration::from_secs(self.stale_after_secs),
            retry: RetryPolicy::default().with_max_retries(self.max_retries),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            refetch_on_focus: self.refetch_on_focus,
            refetch_on_reconnect: self.refetch_on_reconnect,
        }
    }
}

/// Local cache TTLs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub session_ttl_secs: u64,
    pub stabilizer_window_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            session_ttl_secs: CacheTtl::SESSION.as_secs(),
            stabilizer_window_secs: CacheTtl::STABILIZER_WINDOW.as_secs(),
        }
    }
}

impl CacheSettings {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn stabilizer_window(&self) -> Duration {
        Duration::from_secs(self.stabilizer_window_secs)
    }
}

/// Offline cache settings as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub version: String,
    pub precache: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for OfflineSettings {
    fn default() -> Self {
        let defaults = OfflineConfig::default();
        Self {
            origin: None,
            version: defaults.version,
            precache: defaults.precache,
            exclude: defaults.exclude,
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::Invalid(
            "Could not determine home directory".to_string(),
        ))?;

        Ok(home.join(".pulsesync").join("config.yaml"))
    }

    /// Resolve an explicit path, falling back to `PULSESYNC_CONFIG` and then
    /// the default location
    pub fn resolve_path(path: Option<&str>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(PathBuf::from(p)),
            None => match std::env::var(CONFIG_ENV) {
                Ok(p) if !p.is_empty() => Ok(PathBuf::from(p)),
                _ => Self::default_path(),
            },
        }
    }

    /// Load configuration from `path` (or the default location) and apply
    /// environment overrides
    pub fn load_at(path: Option<&str>) -> Result<Self> {
        let mut config = Self::load_from(&Self::resolve_path(path)?)?;
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()).into());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;

        Ok(config)
    }

    /// Save configuration to `path` (or the default location)
    pub fn save_at(&self, path: Option<&str>) -> Result<()> {
        self.save_to(&Self::resolve_path(path)?)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SaveError(e.to_string()))?;

        std::fs::write(path, contents)?;

        // The file holds the API key
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(API_URL_ENV).ok(),
            std::env::var(API_KEY_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, api_url: Option<String>, api_key: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.is_empty()) {
            self.api_url = Some(url);
        }
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            self.api_key = Some(key);
        }
    }

    /// Validate that the remote API is configured, returning (url, key)
    pub fn validate_remote(&self) -> Result<(&str, &str)> {
        match (self.api_url.as_deref(), self.api_key.as_deref()) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => Ok((url, key)),
            _ => Err(ConfigError::MissingRemote.into()),
        }
    }

    /// Offline cache settings with a resolved origin
    pub fn offline_config(&self) -> Result<OfflineConfig> {
        let origin = self
            .offline
            .origin
            .clone()
            .ok_or(ConfigError::MissingOrigin)?;

        if self.offline.version.trim().is_empty() {
            return Err(ConfigError::Invalid("offline.version must not be empty".to_string()).into());
        }

        Ok(OfflineConfig {
            origin,
            version: self.offline.version.clone(),
            precache: self.offline.precache.clone(),
            exclude: self.offline.exclude.clone(),
        })
    }
}

//! Client configuration.
//!
//! Loaded from YAML with every field defaulted, then overlaid with
//! `SPACEDESK_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use spacedesk_core::{DEFAULT_ACTIVITY_CAP, DEFAULT_REMINDER_WINDOW_DAYS};
use spacedesk_store_sqlite::DEFAULT_NAMESPACE;

pub const ENV_CACHE_PATH: &str = "SPACEDESK_CACHE_PATH";
pub const ENV_NAMESPACE: &str = "SPACEDESK_NAMESPACE";
pub const ENV_REMOTE_URL: &str = "SPACEDESK_REMOTE_URL";
pub const ENV_REMOTE_KEY: &str = "SPACEDESK_REMOTE_KEY";
pub const ENV_DAY_RECORD_SYNC: &str = "SPACEDESK_DAY_RECORD_SYNC";

/// Where day records live.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DayRecordSync {
    /// Propagated to and pulled from the remote `day_records` table.
    #[default]
    Remote,
    /// Never leave the local cache.
    CacheOnly,
}

impl DayRecordSync {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "remote" => Some(Self::Remote),
            "cache_only" => Some(Self::CacheOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Project URL; tables are addressed as `{base_url}/rest/v1/{table}`.
    pub base_url: String,
    pub api_key: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 15_000,
        }
    }
}

/// Credentials of the built-in root identity. Matched before the identity store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootstrapRoot {
    pub username: String,
    pub password: String,
    pub display_name: String,
}

impl Default for BootstrapRoot {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            password: "0001000".to_string(),
            display_name: "System Root".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackerConfig {
    /// `None` keeps the cache in memory.
    pub cache_path: Option<PathBuf>,
    pub namespace: String,
    pub remote: Option<RemoteConfig>,
    pub bootstrap_root: BootstrapRoot,
    pub activity_cap: usize,
    pub day_record_sync: DayRecordSync,
    pub reminder_window_days: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            remote: None,
            bootstrap_root: BootstrapRoot::default(),
            activity_cap: DEFAULT_ACTIVITY_CAP,
            day_record_sync: DayRecordSync::default(),
            reminder_window_days: DEFAULT_REMINDER_WINDOW_DAYS,
        }
    }
}

impl TrackerConfig {
    /// # Errors
    /// Returns an error when the document is not valid YAML for this shape.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).context("failed to parse tracker config")
    }

    /// Read a YAML file and apply environment overrides.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Ok(Self::from_yaml_str(&raw)?.with_env_overrides())
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup. Blank values are ignored.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).map(|value| value.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(path) = var(ENV_CACHE_PATH) {
            self.cache_path = Some(PathBuf::from(path));
        }
        if let Some(namespace) = var(ENV_NAMESPACE) {
            self.namespace = namespace;
        }
        if let Some(url) = var(ENV_REMOTE_URL) {
            self.remote.get_or_insert_with(RemoteConfig::default).base_url = url;
        }
        if let Some(key) = var(ENV_REMOTE_KEY) {
            self.remote.get_or_insert_with(RemoteConfig::default).api_key = key;
        }
        if let Some(raw) = var(ENV_DAY_RECORD_SYNC) {
            match DayRecordSync::parse(&raw) {
                Some(policy) => self.day_record_sync = policy,
                None => tracing::warn!(value = %raw, "ignoring unknown {ENV_DAY_RECORD_SYNC}"),
            }
        }
        self
    }

    /// Remote settings, when a base URL is configured.
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteConfig> {
        self.remote.as_ref().filter(|remote| !remote.base_url.trim().is_empty())
    }
}

//! Application configuration management.
//!
//! Configuration is stored at `~/.config/huddle/config.json`; every field has
//! a default so a missing or partial file is fine. The API base URL can be
//! overridden with `HUDDLE_API_URL`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::api::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::cache::FetchOrdering;
use crate::scheduler::DEFAULT_REFRESH_INTERVAL_SECS;
use crate::sweeper::DEFAULT_SWEEP_INTERVAL_SECS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "huddle";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_API_BASE_URL: &str = "https://api.huddle.app/api/v1/";

pub const ENV_API_URL: &str = "HUDDLE_API_URL";
pub const ENV_TOKEN: &str = "HUDDLE_TOKEN";
pub const ENV_USER_ID: &str = "HUDDLE_USER_ID";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub refresh_interval_secs: u64,
    pub sweep_interval_secs: u64,
    /// Mirror the cache to disk so it survives restarts
    pub persist_cache: bool,
    /// IANA zone for activities without a client timezone; device zone if unset
    pub fallback_timezone: Option<String>,
    pub fetch_ordering: FetchOrdering,
    pub last_user_id: Option<Uuid>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            persist_cache: true,
            fallback_timezone: None,
            fetch_ordering: FetchOrdering::default(),
            last_user_id: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Per-user cache directory, so switching accounts never mixes data.
    pub fn cache_dir(&self, user_id: Option<Uuid>) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;

        let mut path = cache_dir.join(APP_NAME);
        if let Some(user_id) = user_id.or(self.last_user_id) {
            path = path.join(user_id.to_string());
        }
        Ok(path)
    }

    /// Apply `HUDDLE_API_URL` if set.
    pub fn apply_env(self) -> Self {
        self.with_api_url_override(std::env::var(ENV_API_URL).ok())
    }

    pub fn with_api_url_override(mut self, api_url: Option<String>) -> Self {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        self
    }

    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid API base URL: {}", self.api_base_url))
    }

    pub fn fallback_zone(&self) -> Result<Option<Tz>> {
        self.fallback_timezone
            .as_deref()
            .map(|name| {
                name.parse::<Tz>()
                    .map_err(|_| anyhow::anyhow!("Unknown timezone in config: {}", name))
            })
            .transpose()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

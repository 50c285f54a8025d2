//! Client configuration.
//!
//! Stored at `~/.config/tabsync/config.json`. Missing fields take their
//! defaults; `TABSYNC_API_URL` and `TABSYNC_ORIGIN` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::DEFAULT_STALE_MINUTES;
use crate::search::{SearchConfig, DEFAULT_MIN_CHARS, DEFAULT_QUIET_MS, DEFAULT_RESULT_LIMIT};

/// Application name used for config/data directory paths
const APP_NAME: &str = "tabsync";

const CONFIG_FILE: &str = "config.json";

const ENV_API_URL: &str = "TABSYNC_API_URL";
const ENV_ORIGIN: &str = "TABSYNC_ORIGIN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    /// Namespace of the shared store. Processes with the same origin see
    /// each other's sessions and signals.
    pub origin: String,
    pub store_dir: Option<PathBuf>,
    pub session_stale_minutes: u64,
    pub search_quiet_ms: u64,
    pub search_min_chars: usize,
    pub search_limit: usize,
    pub poll_interval_secs: u64,
    pub store_scan_ms: u64,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            origin: "default".to_string(),
            store_dir: None,
            session_stale_minutes: DEFAULT_STALE_MINUTES,
            search_quiet_ms: DEFAULT_QUIET_MS,
            search_min_chars: DEFAULT_MIN_CHARS,
            search_limit: DEFAULT_RESULT_LIMIT,
            poll_interval_secs: 30,
            store_scan_ms: 500,
            log_dir: None,
        }
    }
}

impl Config {
    /// Load from the standard location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("Invalid config in {}", path.display()))
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

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(origin) = lookup(ENV_ORIGIN).filter(|v| !v.trim().is_empty()) {
            self.origin = origin;
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory of the file-backed shared store for this origin.
    pub fn store_dir(&self) -> Result<PathBuf> {
        let base = match &self.store_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?
                .join(APP_NAME),
        };
        Ok(base.join(sanitize_origin(&self.origin)))
    }

    pub fn session_stale_after(&self) -> Duration {
        Duration::from_secs(self.session_stale_minutes * 60)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn store_scan_interval(&self) -> Duration {
        Duration::from_millis(self.store_scan_ms)
    }

    pub fn search(&self) -> SearchConfig {
        SearchConfig {
            quiet_period: Duration::from_millis(self.search_quiet_ms),
            min_chars: self.search_min_chars,
            limit: self.search_limit,
        }
    }
}

/// Origins like `https://app.example.com` become one path component.
fn sanitize_origin(origin: &str) -> String {
    let cleaned: String = origin
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    if cleaned.trim_matches(|c| c == '.' || c == '_').is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.session_stale_after(), Duration::from_secs(300));
        assert_eq!(config.search().quiet_period, Duration::from_millis(300));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_base_url": "https://api.example.com", "search_limit": 25}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.search().limit, 25);
        assert_eq!(config.poll_interval_secs, 30);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            origin: "staging".to_string(),
            store_scan_ms: 250,
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|name| match name {
            ENV_API_URL => Some("https://api.example.com".to_string()),
            ENV_ORIGIN => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.origin, "default");
    }

    #[test]
    fn test_store_dir_per_origin() {
        let config = Config {
            store_dir: Some(PathBuf::from("/tmp/tabsync")),
            origin: "https://app.example.com".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.store_dir().unwrap(),
            PathBuf::from("/tmp/tabsync/https___app.example.com")
        );
        assert_eq!(sanitize_origin(".."), "default");
    }
}

//! Application configuration management.
//!
//! This module handles loading and saving the configuration: where the
//! restaurant API lives, where the page shell is served from, and where
//! local data is kept.
//!
//! Configuration is stored at `~/.config/restocache/config.json`. Any field
//! may be overridden through the environment (`RESTOCACHE_API_URL`,
//! `RESTOCACHE_APP_URL`, `RESTOCACHE_CACHE_DIR`).

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "restocache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_URL: &str = "http://localhost:1337";
const DEFAULT_APP_URL: &str = "http://localhost:8000";
const DEFAULT_STATIC_PREFIX: &str = "restaurant-static-";
const DEFAULT_STATIC_VERSION: u32 = 14;
const DEFAULT_DETAIL_PAGES: u32 = 10;
const DEFAULT_OFFLINE_IMAGE: &str = "/img/offline.png";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub app_url: String,
    pub cache_dir: Option<PathBuf>,
    pub static_cache_prefix: String,
    pub static_cache_version: u32,
    pub detail_pages: u32,
    pub offline_image: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            app_url: DEFAULT_APP_URL.to_string(),
            cache_dir: None,
            static_cache_prefix: DEFAULT_STATIC_PREFIX.to_string(),
            static_cache_version: DEFAULT_STATIC_VERSION,
            detail_pages: DEFAULT_DETAIL_PAGES,
            offline_image: DEFAULT_OFFLINE_IMAGE.to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
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

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("RESTOCACHE_API_URL").filter(|v| !v.trim().is_empty()) {
            self.api_url = url.trim().to_string();
        }
        if let Some(url) = var("RESTOCACHE_APP_URL").filter(|v| !v.trim().is_empty()) {
            self.app_url = url.trim().to_string();
        }
        if let Some(dir) = var("RESTOCACHE_CACHE_DIR").filter(|v| !v.trim().is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir.trim()));
        }
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_url, "http://localhost:1337");
        assert_eq!(config.static_cache_prefix, "restaurant-static-");
        assert_eq!(config.static_cache_version, 14);
        assert_eq!(config.offline_image, "/img/offline.png");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"api_url": "http://api.test:9000"}"#)
            .expect("partial config should parse");
        assert_eq!(config.api_url, "http://api.test:9000");
        assert_eq!(config.app_url, DEFAULT_APP_URL);
        assert_eq!(config.detail_pages, DEFAULT_DETAIL_PAGES);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "RESTOCACHE_API_URL" => Some(" http://remote:1337 ".to_string()),
            "RESTOCACHE_CACHE_DIR" => Some("/tmp/resto".to_string()),
            "RESTOCACHE_APP_URL" => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(config.api_url, "http://remote:1337");
        assert_eq!(config.app_url, DEFAULT_APP_URL);
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/resto"));
    }
}

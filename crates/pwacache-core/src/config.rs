//! Application configuration management.
//!
//! This module handles loading the configuration that names the current
//! cache generation, the origin the pages are served from, and the install
//! manifest to pre-populate.
//!
//! Configuration is read from `$PWACACHE_CONFIG` if set, otherwise from
//! `~/.config/pwacache/config.json`. A missing file means defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::models::CacheName;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "pwacache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "PWACACHE_CONFIG";

const DEFAULT_APP_NAME: &str = "simple-pwa-ts";
const DEFAULT_VERSION: &str = "1.0.0";
const DEFAULT_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_SCOPE: &str = "/";

/// URL the page registers the worker script at
const DEFAULT_SCRIPT_URL: &str = "/sw.js";

/// Resources pre-populated on install
const DEFAULT_PRECACHE: &[&str] = &[
    "/",
    "/static/js/bundle.js",
    "/static/css/main.css",
    "/manifest.json",
    "/icon-192x192.png",
    "/icon-512x512.png",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_name: String,
    pub version: String,
    pub origin: String,
    pub precache: Vec<String>,
    pub scope: String,
    pub script_url: String,
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            version: DEFAULT_VERSION.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            precache: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
            scope: DEFAULT_SCOPE.to_string(),
            script_url: DEFAULT_SCRIPT_URL.to_string(),
            cache_dir: None,
        }
    }
}

/// The settings a single worker version runs with.
///
/// Built once at startup and handed to the `CacheManager`; nothing in it
/// changes while the worker lives.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub cache_name: CacheName,
    pub precache: Vec<Url>,
}

impl WorkerConfig {
    pub fn new(cache_name: CacheName) -> Self {
        Self {
            cache_name,
            precache: Vec::new(),
        }
    }

    pub fn with_precache(mut self, precache: Vec<Url>) -> Self {
        self.precache = precache;
        self
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Ok(PathBuf::from(path));
        }
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn cache_name(&self) -> CacheName {
        CacheName::versioned(&self.app_name, &self.version)
    }

    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin).with_context(|| format!("Invalid origin: {}", self.origin))
    }

    /// Resolve a root-relative path (or absolute URL) against the origin.
    pub fn resolve(&self, target: &str) -> Result<Url> {
        self.origin_url()?
            .join(target)
            .with_context(|| format!("Invalid URL: {}", target))
    }

    pub fn worker_config(&self) -> Result<WorkerConfig> {
        let precache = self
            .precache
            .iter()
            .map(|path| self.resolve(path))
            .collect::<Result<Vec<_>>>()?;

        Ok(WorkerConfig::new(self.cache_name()).with_precache(precache))
    }
}

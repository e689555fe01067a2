use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::PartitionNames;

/// Every field but `origin` may be left out of a config file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Upstream origin the proxy fronts
  pub origin: String,
  /// Address the proxy listens on
  #[serde(default = "default_listen")]
  pub listen: SocketAddr,
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
  /// Activate right after install instead of waiting for SKIP_WAITING
  #[serde(default = "default_skip_waiting")]
  pub skip_waiting: bool,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub push: PushConfig,
  #[serde(default)]
  pub periodic: PeriodicConfig,
}

fn default_listen() -> SocketAddr {
  SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_request_timeout_secs() -> u64 {
  30
}

fn default_skip_waiting() -> bool {
  true
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      listen: default_listen(),
      request_timeout_secs: default_request_timeout_secs(),
      skip_waiting: default_skip_waiting(),
      cache: CacheConfig::default(),
      sync: SyncConfig::default(),
      push: PushConfig::default(),
      periodic: PeriodicConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Versioned name of the precache partition
  pub static_name: String,
  /// Versioned name of the runtime partition
  pub dynamic_name: String,
  /// Database file (defaults to the data directory)
  pub database: Option<PathBuf>,
  /// Paths or absolute URLs fetched at install time
  pub manifest: Vec<String>,
  pub offline_page: String,
  pub api_prefixes: Vec<String>,
  /// File extensions served cache-first (case-insensitive)
  #[serde(deserialize_with = "deserialize_lowercase_set")]
  pub static_extensions: BTreeSet<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      static_name: "zewed-ai-v2.0.0".to_string(),
      dynamic_name: "zewed-dynamic-v1.0.0".to_string(),
      database: None,
      manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
      offline_page: "/offline.html".to_string(),
      api_prefixes: vec!["/api/".to_string()],
      static_extensions: ["css", "js", "png", "jpg", "svg", "woff", "woff2", "ttf"]
        .into_iter()
        .map(String::from)
        .collect(),
    }
  }
}

const DEFAULT_MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/ai-assistant.html",
  "/job-listings.html",
  "/resources.html",
  "/profile.html",
  "/login.html",
  "/signup.html",
  "/offline.html",
  "/css/main.css",
  "/css/ai-chat.css",
  "/js/ai-integration.js",
  "/js/chat.js",
  "/manifest.json",
  "/assets/icons/icon-72x72.png",
  "/assets/icons/icon-192x192.png",
  "/assets/icons/icon-512x512.png",
  "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css",
  "https://fonts.googleapis.com/css2?family=Segoe+UI:wght@300;400;500;600;700&display=swap",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Sync tag that replays queued chat messages
  pub tag: String,
  /// Endpoint whose failed POSTs are queued
  pub chat_endpoint: String,
  /// Failures from this attempt count on are logged as warnings
  pub warn_after_attempts: u32,
  /// How often the origin is probed for connectivity (0 disables)
  pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "sync-chat-messages".to_string(),
      chat_endpoint: "/api/chat/messages".to_string(),
      warn_after_attempts: 5,
      probe_interval_secs: 30,
    }
  }
}

/// Values used for fields a push payload leaves out.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub url: String,
}

impl Default for PushConfig {
  fn default() -> Self {
    Self {
      title: "New Message".to_string(),
      body: "You have a new message from Career Assistant".to_string(),
      icon: "/assets/icons/icon-192x192.png".to_string(),
      badge: "/assets/icons/badge-72x72.png".to_string(),
      url: "/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeriodicConfig {
  pub tag: String,
  pub resource_path: String,
  /// Seconds between refreshes (0 disables)
  pub interval_secs: u64,
}

impl Default for PeriodicConfig {
  fn default() -> Self {
    Self {
      tag: "update-career-resources".to_string(),
      resource_path: "/api/resources/latest".to_string(),
      interval_secs: 12 * 60 * 60,
    }
  }
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| s.trim_start_matches('.').to_lowercase())
      .collect(),
  )
}

impl Config {
  /// Load configuration from file, or fall back to the defaults.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-worker/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    // Fail early on a bad origin rather than on the first request
    config.origin_url()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a path against the origin. Absolute URLs are returned unchanged.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path, e))
  }

  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    self
      .cache
      .manifest
      .iter()
      .map(|entry| self.resolve(entry))
      .collect()
  }

  pub fn partition_names(&self) -> PartitionNames {
    PartitionNames {
      static_name: self.cache.static_name.clone(),
      dynamic_name: self.cache.dynamic_name.clone(),
    }
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

use chrono::Duration as ChronoDuration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::CacheSettings;
use crate::error::ConfigError;
use crate::monitor::{AlertThresholds, MonitorSettings, OptimizationConfig};
use crate::queue::QueueSettings;
use crate::store::SqliteStore;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Log filter used when RUST_LOG is unset
  pub log_level: Option<String>,
  pub cache: CacheConfig,
  pub queue: QueueConfig,
  pub sync: SyncConfig,
  pub monitor: MonitorConfig,
  pub remote: RemoteConfig,
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub namespace: String,
  pub ttl_secs: i64,
  pub max_bytes: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    let defaults = CacheSettings::default();
    Self {
      namespace: "default".to_string(),
      ttl_secs: defaults.default_ttl.num_seconds(),
      max_bytes: defaults.max_bytes,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  pub max_len: usize,
  pub max_retries: u32,
  pub storage_key: String,
}

impl Default for QueueConfig {
  fn default() -> Self {
    let defaults = QueueSettings::default();
    Self {
      max_len: defaults.max_len,
      max_retries: defaults.max_retries,
      storage_key: defaults.storage_key,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub interval_secs: u64,
  /// URL polled to detect connectivity. Without one the store assumes it is online.
  pub probe_url: Option<String>,
  pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: 30,
      probe_url: None,
      probe_interval_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
  pub interval_secs: u64,
  pub detailed_logging: bool,
  pub auto_tune: bool,
  pub thresholds: AlertThresholds,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      interval_secs: 30,
      detailed_logging: true,
      auto_tune: false,
      thresholds: AlertThresholds::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  pub base_url: String,
  pub timeout_secs: u64,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8080/".to_string(),
      timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Set to false to keep everything in memory for the life of the process
  pub persist: bool,
  /// SQLite database file (default: <data dir>/syncstash/store.db)
  pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      persist: true,
      path: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./syncstash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/syncstash/config.yaml
  ///
  /// Falls back to defaults when no file is found.
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
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("syncstash.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("syncstash").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty document is valid and means all defaults
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    self.optimization().validate()?;
    if self.queue.max_len == 0 {
      return Err(ConfigError::ZeroCapacity);
    }
    Ok(())
  }

  pub fn cache_settings(&self) -> CacheSettings {
    CacheSettings {
      // Out of range values saturate and are rejected by `validate`
      default_ttl: ChronoDuration::try_seconds(self.cache.ttl_secs).unwrap_or(ChronoDuration::MAX),
      max_bytes: self.cache.max_bytes,
    }
  }

  pub fn queue_settings(&self) -> QueueSettings {
    QueueSettings {
      max_len: self.queue.max_len,
      max_retries: self.queue.max_retries,
      storage_key: self.queue.storage_key.clone(),
    }
  }

  pub fn monitor_settings(&self) -> MonitorSettings {
    MonitorSettings {
      interval: Duration::from_secs(self.monitor.interval_secs),
      detailed_logging: self.monitor.detailed_logging,
      auto_tune: self.monitor.auto_tune,
      ..MonitorSettings::default()
    }
  }

  pub fn optimization(&self) -> OptimizationConfig {
    OptimizationConfig::from_cache(self.cache_settings(), self.monitor.thresholds)
  }

  pub fn sync_interval(&self) -> Duration {
    Duration::from_secs(self.sync.interval_secs)
  }

  pub fn remote_timeout(&self) -> Duration {
    Duration::from_secs(self.remote.timeout_secs)
  }

  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.remote.base_url)
      .map_err(|e| eyre!("Invalid remote base_url {}: {}", self.remote.base_url, e))
  }

  pub fn probe_url(&self) -> Result<Option<Url>> {
    self
      .sync
      .probe_url
      .as_deref()
      .map(|u| Url::parse(u).map_err(|e| eyre!("Invalid sync probe_url {}: {}", u, e)))
      .transpose()
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStore::default_path().ok_or_else(|| eyre!("Could not determine data directory")),
    }
  }

  /// Directory holding the database and log files.
  pub fn data_dir(&self) -> Result<PathBuf> {
    Ok(
      self
        .database_path()?
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")),
    )
  }
}

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connectivity::DnsProbe;
use crate::sync::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub remote: RemoteConfig,
  pub storage: StorageConfig,
  pub connectivity: ConnectivityConfig,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  /// API root, e.g. "https://school.example.org/api"
  pub base_url: String,
  pub timeout_secs: u64,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3000/api".to_string(),
      timeout_secs: 30,
    }
  }
}

impl RemoteConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Database file (defaults to the platform data directory)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// `host:port` pairs resolved to decide reachability; at least two
  pub probe_hosts: Vec<String>,
  pub probe_timeout_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_hosts: DnsProbe::DEFAULT_HOSTS
        .iter()
        .map(|h| h.to_string())
        .collect(),
      probe_timeout_secs: DnsProbe::DEFAULT_TIMEOUT.as_secs(),
    }
  }
}

impl ConnectivityConfig {
  pub fn probe_timeout(&self) -> Duration {
    Duration::from_secs(self.probe_timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// When false, every read goes to the server (or the local store)
  pub enabled: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self { enabled: true }
  }
}

/// Retry settings for queued writes. Both unset means retry forever, immediately.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub max_attempts: Option<u32>,
  pub backoff_base_secs: Option<u64>,
}

impl SyncConfig {
  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.max_attempts,
      backoff_base: self.backoff_base_secs.map(Duration::from_secs),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter directive; `RUST_LOG` wins when set
  pub level: String,
  /// Log file directory (defaults to the platform data directory)
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./edusync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/edusync/config.yaml
  ///
  /// Without any file the defaults are used.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("edusync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("edusync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.remote.base_url.trim().is_empty() {
      return Err(eyre!("remote.base_url must not be empty"));
    }
    Ok(config)
  }

  /// API token from the environment, if any.
  ///
  /// Checks EDUSYNC_API_TOKEN.
  pub fn api_token() -> Option<String> {
    std::env::var("EDUSYNC_API_TOKEN")
      .ok()
      .filter(|token| !token.trim().is_empty())
  }

  pub fn log_directory(&self) -> Result<PathBuf> {
    match &self.logging.directory {
      Some(dir) => Ok(dir.clone()),
      None => dirs::data_dir()
        .map(|dir| dir.join("edusync").join("logs"))
        .ok_or_else(|| eyre!("Could not determine data directory for logs")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_file_gives_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.remote.timeout_secs, 30);
    assert!(config.cache.enabled);
    assert_eq!(config.connectivity.probe_hosts.len(), 2);
    assert_eq!(config.sync.retry_policy(), RetryPolicy::default());
  }

  #[test]
  fn test_full_file() {
    let yaml = r#"
remote:
  base_url: https://school.example.org/api
  timeout_secs: 10
storage:
  path: /var/lib/edusync/data.db
connectivity:
  probe_hosts: [one.one.one.one, "dns.google:53"]
  probe_timeout_secs: 3
cache:
  enabled: false
sync:
  max_attempts: 5
  backoff_base_secs: 30
logging:
  level: debug
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.remote.timeout(), Duration::from_secs(10));
    assert_eq!(
      config.storage.path.as_deref(),
      Some(Path::new("/var/lib/edusync/data.db"))
    );
    assert_eq!(config.connectivity.probe_timeout(), Duration::from_secs(3));
    assert!(!config.cache.enabled);
    assert_eq!(
      config.sync.retry_policy(),
      RetryPolicy::bounded(5, Some(Duration::from_secs(30)))
    );
    assert_eq!(config.logging.level, "debug");
  }

  #[test]
  fn test_rejects_empty_base_url() {
    assert!(Config::parse("remote:\n  base_url: ''\n").is_err());
  }

  #[test]
  fn test_missing_explicit_file_is_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/edusync.yaml"))).is_err());
  }
}

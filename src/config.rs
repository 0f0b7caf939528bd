use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Environment variable that overrides `api.base_url`
const API_BASE_ENV: &str = "CRM_OFFLINE_API_BASE";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  #[serde(default)]
  pub drain: DrainConfig,
  /// SQLite file for the cache and queue (defaults to the user data directory)
  pub database_path: Option<PathBuf>,
  /// Also write logs to this file
  pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Absolute URL that request paths are appended to
  pub base_url: Url,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
  /// URL to probe for reachability (defaults to `api.base_url`)
  pub probe_url: Option<Url>,
  #[serde(default = "default_probe_timeout_ms")]
  pub probe_timeout_ms: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_url: None,
      probe_timeout_ms: default_probe_timeout_ms(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DrainConfig {
  /// Seconds between background drain passes
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
}

impl Default for DrainConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_interval_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_probe_timeout_ms() -> u64 {
  2000
}

fn default_interval_secs() -> u64 {
  30
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./crm-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/crm-offline/config.yaml
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/crm-offline/config.yaml"
        ))
      }
    };

    if let Ok(base) = std::env::var(API_BASE_ENV) {
      config.api.base_url = Url::parse(&base)
        .map_err(|e| eyre!("Invalid {} '{}': {}", API_BASE_ENV, base, e))?;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("crm-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("crm-offline").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.api.base_url.cannot_be_a_base() {
      return Err(eyre!("api.base_url must be an absolute http(s) URL"));
    }
    if config.drain.interval_secs == 0 {
      return Err(eyre!("drain.interval_secs must be at least 1"));
    }
    Ok(config)
  }
}

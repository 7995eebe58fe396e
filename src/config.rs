use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub storage: StorageConfig,
  /// Response cache lifetimes per resource class
  pub ttl: TtlConfig,
  pub queue: QueueConfig,
  pub content: ContentConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL every relative request path is joined onto
  pub base_url: String,
  /// Whole-request timeout applied by the HTTP client
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8080/api/".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// When false the engine runs without persistence
  pub enabled: bool,
  /// Database file (defaults to $XDG_DATA_HOME/storysync/store.db)
  pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
  /// Profiles, stats and achievements
  pub profile_secs: u64,
  /// Stories, chapters and episodes
  pub story_secs: u64,
  pub notifications_secs: u64,
  /// Reading progress
  pub progress_secs: u64,
  /// Anything not matched above
  pub default_secs: u64,
}

impl Default for TtlConfig {
  fn default() -> Self {
    Self {
      profile_secs: 365 * 24 * 60 * 60,
      story_secs: 14 * 24 * 60 * 60,
      notifications_secs: 5 * 60,
      progress_secs: 60 * 60,
      default_secs: 24 * 60 * 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Failed replays before a mutation is dead-lettered (0 = retry forever)
  pub max_retries: u32,
  /// First retry delay; doubles after each failure
  pub backoff_base_ms: u64,
  /// Upper bound on the retry delay
  pub backoff_max_ms: u64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_retries: 10,
      backoff_base_ms: 1_000,
      backoff_max_ms: 5 * 60 * 1_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
  /// Days before cached drafts and offline content expire (0 = never)
  pub expiry_days: u32,
}

impl Default for ContentConfig {
  fn default() -> Self {
    Self { expiry_days: 30 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter directive used when STORYSYNC_LOG is unset
  pub level: String,
  /// Also write daily-rotated log files here
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
  /// 2. ./storysync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storysync/config.yaml
  ///
  /// Without a file the defaults are used. `STORYSYNC_API_URL` overrides
  /// the API base URL either way.
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
      None => Config::default(),
    };

    if let Ok(url) = std::env::var("STORYSYNC_API_URL") {
      config.api.base_url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("storysync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storysync").join("config.yaml");
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

  /// Parse YAML configuration. Missing sections take their defaults.
  pub fn parse(contents: &str) -> Result<Self> {
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }
}

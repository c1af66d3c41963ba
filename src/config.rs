//! Application configuration with persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to access config file: {0}")]
  Io(#[from] std::io::Error),
  #[error("Invalid config file: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
  /// Custom MPV executable (None = auto-detect).
  #[serde(default)]
  pub player_cmd: Option<String>,

  /// Path of the MPV control socket.
  #[serde(default = "default_ipc_path")]
  pub ipc_path: PathBuf,

  /// Drive MPV over its JSON IPC socket.
  #[serde(default = "default_true")]
  pub enable_ipc: bool,

  /// Pass `--video=no` to MPV.
  #[serde(default)]
  pub disable_video: bool,

  /// Additional MPV command-line arguments.
  #[serde(default)]
  pub extra_args: Vec<String>,

  /// How long to wait for MPV to create its socket.
  #[serde(default = "default_socket_timeout_ms")]
  pub socket_timeout_ms: u64,

  /// Poll interval while waiting for the socket.
  #[serde(default = "default_socket_poll_interval_ms")]
  pub socket_poll_interval_ms: u64,

  /// Wait for playlist confirmations during a bulk load.
  #[serde(default = "default_confirm_timeout_ms")]
  pub confirm_timeout_ms: u64,

  /// Wait for playlist confirmation after a single append or insert.
  #[serde(default = "default_append_confirm_timeout_ms")]
  pub append_confirm_timeout_ms: u64,

  /// Grace period for MPV to exit after SIGTERM.
  #[serde(default = "default_stop_timeout_ms")]
  pub stop_timeout_ms: u64,
}

fn default_true() -> bool {
  true
}

fn default_ipc_path() -> PathBuf {
  config_dir().join("ipc-socket")
}

fn default_socket_timeout_ms() -> u64 {
  5000
}

fn default_socket_poll_interval_ms() -> u64 {
  50
}

fn default_confirm_timeout_ms() -> u64 {
  3000
}

fn default_append_confirm_timeout_ms() -> u64 {
  2000
}

fn default_stop_timeout_ms() -> u64 {
  1000
}

/// Directory holding the settings file and the default socket.
pub fn config_dir() -> PathBuf {
  dirs::config_dir()
    .unwrap_or_else(|| PathBuf::from(".config"))
    .join("musicli")
}

/// Default location of the settings file.
pub fn default_config_path() -> PathBuf {
  config_dir().join("settings.json")
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      player_cmd: None,
      ipc_path: default_ipc_path(),
      enable_ipc: true,
      disable_video: false,
      extra_args: Vec::new(),
      socket_timeout_ms: default_socket_timeout_ms(),
      socket_poll_interval_ms: default_socket_poll_interval_ms(),
      confirm_timeout_ms: default_confirm_timeout_ms(),
      append_confirm_timeout_ms: default_append_confirm_timeout_ms(),
      stop_timeout_ms: default_stop_timeout_ms(),
    }
  }
}

impl AppConfig {
  /// Load from `path`, writing the defaults when the file is missing or empty.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
      Ok(contents) => contents,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
      Err(e) => return Err(e.into()),
    };

    if contents.trim().is_empty() {
      log::info!("Writing default config to {}", path.display());
      let config = Self::default();
      config.save(path)?;
      return Ok(config);
    }

    let config: Self = serde_json::from_str(&contents)?;
    config.validate()?;
    Ok(config)
  }

  /// Write as pretty JSON, creating parent directories.
  pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(self)?)?;
    Ok(())
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if let Some(cmd) = &self.player_cmd {
      if cmd.trim().is_empty() {
        return Err(ConfigError::Invalid("Player command cannot be empty".into()));
      }
    }
    if self.enable_ipc && self.ipc_path.as_os_str().is_empty() {
      return Err(ConfigError::Invalid("IPC socket path cannot be empty".into()));
    }
    if self.socket_poll_interval_ms == 0 {
      return Err(ConfigError::Invalid("Socket poll interval must be positive".into()));
    }
    if self.socket_poll_interval_ms > self.socket_timeout_ms {
      return Err(ConfigError::Invalid(
        "Socket poll interval cannot exceed the socket timeout".into(),
      ));
    }
    Ok(())
  }

  pub fn socket_timeout(&self) -> Duration {
    Duration::from_millis(self.socket_timeout_ms)
  }

  pub fn socket_poll_interval(&self) -> Duration {
    Duration::from_millis(self.socket_poll_interval_ms)
  }

  pub fn confirm_timeout(&self) -> Duration {
    Duration::from_millis(self.confirm_timeout_ms)
  }

  pub fn append_confirm_timeout(&self) -> Duration {
    Duration::from_millis(self.append_confirm_timeout_ms)
  }

  pub fn stop_timeout(&self) -> Duration {
    Duration::from_millis(self.stop_timeout_ms)
  }
}

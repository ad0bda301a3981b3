// alist-backup configuration
// Server connection and session state persisted between CLI runs

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default request timeout (seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default retry budget for list requests
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to create config directory: {0}")]
    CreateDir(std::io::Error),
    #[error("Failed to write config: {0}")]
    Write(std::io::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Persisted client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Server base URL, e.g. https://files.example.com
    #[serde(default)]
    pub server_url: String,
    /// Session token returned by login
    #[serde(default)]
    pub token: Option<String>,
    /// Per-installation id sent as `Client-Id`
    #[serde(default)]
    pub client_id: Option<String>,
    /// Id of this device's server session from the last login; survives logout.
    /// `sessions evict` refuses to evict it
    #[serde(default)]
    pub device_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            token: None,
            client_id: None,
            device_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl BackupConfig {
    /// Generate and keep a client id if none exists yet. Returns true if one was created.
    pub fn ensure_client_id(&mut self) -> bool {
        if self.client_id.as_deref().is_some_and(|id| !id.is_empty()) {
            return false;
        }
        self.client_id = Some(uuid::Uuid::new_v4().to_string());
        true
    }

    /// Forget the session token; client id and device key stay
    pub fn clear_session(&mut self) {
        self.token = None;
    }

    pub fn has_session(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Get the path to the config file
pub fn get_config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")));
    config_dir.join("alist-backup").join("config.json")
}

/// Load configuration from a file, falling back to defaults when missing or unreadable
pub fn load_config_from(path: &Path) -> BackupConfig {
    if path.exists() {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse config {:?}: {}", path, e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config {:?}: {}", path, e);
            }
        }
    }

    BackupConfig::default()
}

pub fn load_config() -> BackupConfig {
    load_config_from(&get_config_path())
}

pub fn save_config_to(config: &BackupConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(ConfigError::CreateDir)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content).map_err(ConfigError::Write)?;

    tracing::info!("Config saved to {:?}", path);
    Ok(())
}

pub fn save_config(config: &BackupConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Validate configuration before talking to a server
pub fn validate_config(config: &BackupConfig) -> Result<(), ConfigError> {
    if config.server_url.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "Server URL is not set (use `config set --server` or ALIST_SERVER)".to_string(),
        ));
    }

    let url = url::Url::parse(&config.server_url)
        .map_err(|e| ConfigError::Invalid(format!("Invalid server URL: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "Server URL must be http or https, got {}",
            url.scheme()
        )));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Invalid("Timeout must be at least 1 second".to_string()));
    }

    Ok(())
}

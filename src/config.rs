use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub sdk: SdkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default = "default_ssh_addr")]
    pub ssh_addr: String,
    /// OpenSSH-format host key. When unset or missing, an ephemeral ed25519
    /// key is generated at startup.
    #[serde(default)]
    pub ssh_host_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory containing the source repositories.
    #[serde(default = "default_repo_root")]
    pub repo_root: String,
    /// Directory containing generated SDK repositories (served read-only).
    #[serde(default = "default_sdk_root")]
    pub sdk_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_claim_limit")]
    pub claim_limit: i64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Code-generation targets fanned out per push trigger.
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,
    /// File extensions recognized as schema sources.
    #[serde(default = "default_schema_extensions")]
    pub schema_extensions: Vec<String>,
}

fn default_http_addr() -> String {
    "127.0.0.1:8418".to_string()
}

fn default_ssh_addr() -> String {
    "127.0.0.1:2242".to_string()
}

fn default_repo_root() -> String {
    idlhub_dir().join("repos").to_string_lossy().to_string()
}

fn default_sdk_root() -> String {
    idlhub_dir().join("sdks").to_string_lossy().to_string()
}

fn default_database_url() -> String {
    "postgres://localhost/idlhub".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_claim_limit() -> i64 {
    10
}

fn default_max_attempts() -> i32 {
    3
}

fn default_targets() -> Vec<String> {
    vec!["typescript".to_string(), "python".to_string(), "go".to_string()]
}

fn default_schema_extensions() -> Vec<String> {
    vec![".proto".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            ssh_addr: default_ssh_addr(),
            ssh_host_key: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            sdk_root: default_sdk_root(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            claim_limit: default_claim_limit(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            targets: default_targets(),
            schema_extensions: default_schema_extensions(),
        }
    }
}

impl Config {
    /// Load config from a file, or create a default one if it doesn't exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);

        if config_path.exists() {
            let content =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            Ok(config)
        }
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Get the idlhub directory (~/.idlhub)
pub fn idlhub_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".idlhub")
}

/// Get the default config file path (~/.idlhub/config.toml)
pub fn default_config_path() -> PathBuf {
    idlhub_dir().join("config.toml")
}

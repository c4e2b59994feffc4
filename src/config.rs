//! Sync core configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay address used in development
    #[serde(default = "default_dev_host")]
    pub dev_host: String,

    /// Relay address used in production
    #[serde(default = "default_prod_host")]
    pub prod_host: String,

    /// Deployment mode; selected from the environment, not at runtime
    #[serde(default = "default_mode")]
    pub mode: String,
}

impl RelayConfig {
    /// The sync target for the current deployment mode.
    pub fn host(&self) -> &str {
        if self.mode == "production" {
            &self.prod_host
        } else {
            &self.dev_host
        }
    }

    /// Full WebSocket URL for a household room.
    pub fn room_url(&self, room: &str) -> String {
        format!("{}/parties/main/{}", self.host(), room)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the device-local database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret for session tokens
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Bearer token required to issue invite codes
    #[serde(default)]
    pub admin_token: String,

    /// Session token lifetime in seconds
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Relay bind address
    #[serde(default = "default_bind")]
    pub bind: String,
}

// Defaults
fn default_dev_host() -> String {
    "ws://127.0.0.1:1999".to_string()
}
fn default_prod_host() -> String {
    "wss://sync.hearth.family".to_string()
}
fn default_mode() -> String {
    std::env::var("HEARTH_ENV").unwrap_or_else(|_| "development".to_string())
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("hearth-data")
}
fn default_jwt_secret() -> String {
    "hearth-dev-secret".to_string()
}
fn default_session_ttl() -> u64 {
    60 * 60 * 24 * 30
}
fn default_bind() -> String {
    "0.0.0.0:1999".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            dev_host: default_dev_host(),
            prod_host: default_prod_host(),
            mode: default_mode(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            admin_token: String::new(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            storage: StorageConfig::default(),
            auth: AuthConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }
}

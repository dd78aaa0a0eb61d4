//! Configuration system for classmesh.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CLASSMESH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/classmesh/config.toml
//!   3. ~/.config/classmesh/config.toml

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{
    Role, DEFAULT_CHUNK_SIZE, DEFAULT_DISCOVERY_PORT, DEFAULT_FILE_PORT, DEFAULT_MESSAGE_PORT,
};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Name announced to other participants.
    pub display_name: String,
    /// Role used for files this node sends.
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address every listener binds to.
    pub bind_addr: IpAddr,
    /// Destination of discovery broadcasts.
    pub broadcast_addr: IpAddr,
    /// UDP port for discovery datagrams.
    pub discovery_port: u16,
    /// TCP port for file chunks.
    pub file_port: u16,
    /// TCP port for text messages.
    pub message_port: u16,
    /// Bound on outbound connect and write.
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per chunk when sending.
    pub chunk_size: usize,
    /// Largest chunk a receiver will accept.
    pub max_chunk_bytes: u64,
    /// Where completed files are written.
    pub output_dir: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            network: NetworkConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            display_name: "anonymous".to_string(),
            role: Role::Student,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            file_port: DEFAULT_FILE_PORT,
            message_port: DEFAULT_MESSAGE_PORT,
            connect_timeout_ms: 5_000,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_bytes: 64 * 1024 * 1024,
            output_dir: data_dir().join("received"),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn discovery_bind(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.discovery_port)
    }

    pub fn file_bind(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.file_port)
    }

    pub fn message_bind(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.message_port)
    }

    pub fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_addr, self.discovery_port)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("classmesh")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("classmesh")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MeshConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults with env overrides applied, for when the file is unusable.
    pub fn defaults_with_env() -> Self {
        let mut config = MeshConfig::default();
        config.apply_env_overrides();
        config
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CLASSMESH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings no node could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.display_name.trim().is_empty() {
            return Err(ConfigError::Invalid("display_name is empty".into()));
        }
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be non-zero".into()));
        }
        if self.transfer.chunk_size as u64 > self.transfer.max_chunk_bytes {
            return Err(ConfigError::Invalid(
                "chunk_size exceeds max_chunk_bytes".into(),
            ));
        }
        if self.network.file_port == self.network.message_port {
            return Err(ConfigError::Invalid(
                "file_port and message_port must differ".into(),
            ));
        }
        Ok(())
    }

    /// Apply CLASSMESH_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CLASSMESH_IDENTITY__NAME") {
            self.identity.display_name = v;
        }
        if let Ok(v) = std::env::var("CLASSMESH_IDENTITY__ROLE") {
            if let Ok(role) = v.parse() {
                self.identity.role = role;
            }
        }
        if let Ok(v) = std::env::var("CLASSMESH_NETWORK__BIND_ADDR") {
            if let Ok(a) = v.parse() {
                self.network.bind_addr = a;
            }
        }
        if let Ok(v) = std::env::var("CLASSMESH_NETWORK__BROADCAST_ADDR") {
            if let Ok(a) = v.parse() {
                self.network.broadcast_addr = a;
            }
        }
        if let Ok(v) = std::env::var("CLASSMESH_NETWORK__DISCOVERY_PORT") {
            if let Ok(p) = v.parse() {
                self.network.discovery_port = p;
            }
        }
        if let Ok(v) = std::env::var("CLASSMESH_NETWORK__FILE_PORT") {
            if let Ok(p) = v.parse() {
                self.network.file_port = p;
            }
        }
        if let Ok(v) = std::env::var("CLASSMESH_NETWORK__MESSAGE_PORT") {
            if let Ok(p) = v.parse() {
                self.network.message_port = p;
            }
        }
        if let Ok(v) = std::env::var("CLASSMESH_TRANSFER__OUTPUT_DIR") {
            self.transfer.output_dir = PathBuf::from(v);
        }
    }
}

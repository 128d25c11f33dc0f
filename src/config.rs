//! Configuration file support.
//!
//! Looked up at `--config <path>`, else `<config dir>/treestream/config.toml`.
//! Every field has a default, so an absent file is a valid configuration.
//! `TREESTREAM_ADDR` and `TREESTREAM_LOG` override the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Result, StreamError};

pub const ENV_ADDR: &str = "TREESTREAM_ADDR";
pub const ENV_LOG: &str = "TREESTREAM_LOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the render server listens on and the client connects to
    pub addr: SocketAddr,
    /// Simulated latency of the demo content source, in milliseconds
    pub demo_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            demo_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("treestream").join("config.toml"))
    }

    /// Load configuration. An explicit path must exist; the default path is
    /// optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            StreamError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| StreamError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| StreamError::Config(e.to_string()))
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var(ENV_ADDR) {
            self.server.addr = addr
                .parse()
                .map_err(|e| StreamError::Config(format!("Invalid {}={:?}: {}", ENV_ADDR, addr, e)))?;
        }
        if let Ok(filter) = std::env::var(ENV_LOG) {
            self.log.filter = filter;
        }
        Ok(())
    }
}

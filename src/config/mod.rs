//! Engine configuration.
//!
//! Loaded from `sosflow.toml` in the working directory, falling back to the
//! user configuration directory, falling back to defaults. The controller's
//! socket ports are runtime state published into the loaded record, never
//! read from disk.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::controller::SocketPorts;
use crate::error::{Error, Result};

/// Top-level configuration for a run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool size for the DAG driver.
    pub workers: usize,
    /// Relaunch budget for transiently failing steps.
    pub max_retries: u32,
    /// 0 silent, 1 progress display, 2+ verbose.
    pub verbosity: u8,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Ports of the running controller's sockets, published after start.
    #[serde(skip)]
    pub sockets: Option<SocketPorts>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: 1,
            verbosity: 1,
            logging: LoggingConfig::default(),
            sockets: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log to file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// The path from `--config`, then the user configuration directory,
    /// then built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                return Self::load(&user_path);
            }
        }
        Ok(Self::default())
    }

    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "sosflow").map(|dirs| dirs.config_dir().join("sosflow.toml"))
    }

    /// Publish the controller's bound ports into the configuration record.
    pub fn set_sockets(&mut self, ports: SocketPorts) {
        self.sockets = Some(ports);
    }
}

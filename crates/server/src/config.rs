//! Server configuration with validation
//!
//! Loaded from TOML; every field has a default, so an empty file is a valid
//! in-memory configuration.
//!
//! ```toml
//! listen_host = "0.0.0.0"
//! listen_port = 54758
//! data_dir = "/var/lib/tso"
//! reservation_window = 10000
//! history_capacity = 1048576
//!
//! [durability]
//! mode = "batched"
//! interval_ms = 100
//! batch_size = 16
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tso_concurrency::{
    ManagerOptions, DEFAULT_DECISION_LOG_CAPACITY, DEFAULT_HISTORY_CAPACITY,
    DEFAULT_RESERVATION_WINDOW,
};
use tso_durability::DurabilityMode;
use tso_wire::DEFAULT_MAX_FRAME_SIZE;

/// Default listening port
pub const DEFAULT_PORT: u16 = 54758;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Configuration is not valid TOML for this schema
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Timestamp oracle server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub listen_host: String,
    /// Port to bind (0 picks a free port)
    pub listen_port: u16,
    /// Directory of the timestamp log; absent keeps the oracle in memory
    pub data_dir: Option<PathBuf>,
    /// When reservations are fsynced (ignored without `data_dir`)
    pub durability: DurabilityMode,
    /// Timestamps reserved per log record
    pub reservation_window: u64,
    /// Cells retained by the conflict history
    pub history_capacity: usize,
    /// Commit decisions remembered for repeated requests
    pub decision_log_capacity: usize,
    /// Largest accepted frame payload in bytes
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: DEFAULT_PORT,
            data_dir: None,
            durability: DurabilityMode::default(),
            reservation_window: DEFAULT_RESERVATION_WINDOW,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            decision_log_capacity: DEFAULT_DECISION_LOG_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// In-memory configuration on an ephemeral local port
    pub fn ephemeral() -> Self {
        Self {
            listen_port: 0,
            ..Self::default()
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_host.is_empty() {
            return Err(ConfigError::Invalid("listen_host cannot be empty".into()));
        }
        if self.reservation_window == 0 {
            return Err(ConfigError::Invalid(
                "reservation_window cannot be 0".into(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid("history_capacity cannot be 0".into()));
        }
        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size must be between 1 and {}",
                u32::MAX
            )));
        }
        if let DurabilityMode::Batched {
            batch_size,
            interval_ms,
        } = self.durability
        {
            if batch_size == 0 || interval_ms == 0 {
                return Err(ConfigError::Invalid(
                    "batched durability needs non-zero batch_size and interval_ms".into(),
                ));
            }
        }
        Ok(())
    }

    /// `host:port` to bind
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    /// Durability actually used
    pub fn effective_durability(&self) -> DurabilityMode {
        match self.data_dir {
            Some(_) => self.durability,
            None => DurabilityMode::None,
        }
    }

    /// Sizing for the commit manager
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            history_capacity: self.history_capacity,
            decision_log_capacity: self.decision_log_capacity,
        }
    }
}

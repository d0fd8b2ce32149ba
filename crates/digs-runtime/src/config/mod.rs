//! Configuration management with hierarchical layering.
//!
//! # Architecture
//!
//! ```text
//! Priority (highest to lowest):
//!
//! ┌─────────────────────────────────────────┐
//! │  1. Environment Variables (DIGS_*)      │  Runtime override
//! ├─────────────────────────────────────────┤
//! │  2. Project Config (.digs/config.toml)  │  Project-specific
//! ├─────────────────────────────────────────┤
//! │  3. Global Config (~/.digs/config.toml) │  User defaults
//! ├─────────────────────────────────────────┤
//! │  4. Default Values (compile-time)       │  Fallback
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Config Field | Type |
//! |----------|--------------|------|
//! | `DIGS_NAMESPACE` | `namespace` | String |
//! | `DIGS_PROJECT` | `project` | String |
//! | `DIGS_BROKER_HOST` | `broker.host` | String |
//! | `DIGS_BROKER_PORT` | `broker.port` | u16 |
//! | `DIGS_BROKER_EMBEDDED` | `broker.embedded` | bool |
//! | `DIGS_WORKER_MODE` | `worker.mode` | `process` / `in_process` |
//! | `DIGS_LOG_LEVEL` | `logging.level` | String |
//!
//! Worker processes are configured separately through
//! [`WorkerEnv`](crate::worker::WorkerEnv).
//!
//! # Example Configuration
//!
//! ```toml
//! # .digs/config.toml
//! namespace = "digs"
//! project = "home"
//!
//! [broker]
//! host = "127.0.0.1"
//! port = 1883
//! embedded = true
//!
//! [worker]
//! mode = "process"
//! ready_timeout_ms = 10000
//! retry_interval_ms = 30000
//! max_retries = 3
//!
//! [timeouts]
//! request_ms = 30000
//!
//! [boards.uno]
//! port = "/dev/ttyACM0"
//!
//! [[boards.uno.components]]
//! class = "led"
//! options = { pin = 13 }
//! ```

mod error;
mod loader;
mod types;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use types::{
    BoardConfig, BrokerConfig, ComponentConfig, DigsConfig, LoggingConfig, TimeoutsConfig,
    WorkerConfig, WorkerMode,
};

/// Default global config directory.
pub fn default_config_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".digs")
}

/// Default global config file path.
pub fn default_config_path() -> std::path::PathBuf {
    default_config_dir().join("config.toml")
}

/// Project config directory name.
pub const PROJECT_CONFIG_DIR: &str = ".digs";

/// Project config file name.
pub const PROJECT_CONFIG_FILE: &str = "config.toml";

//! Configuration types.
//!
//! All types implement [`Default`] for compile-time fallback values.

use digs_protocol::{DEFAULT_NAMESPACE, DEFAULT_PROJECT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure.
///
/// This is the unified configuration after merging all layers.
///
/// # Example
///
/// ```
/// use digs_runtime::config::DigsConfig;
///
/// let config = DigsConfig::default();
/// assert_eq!(config.namespace, "digs");
/// assert!(config.boards.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DigsConfig {
    /// Topic namespace shared by every client.
    pub namespace: String,

    /// Topic project shared by every client.
    pub project: String,

    /// Broker connection.
    pub broker: BrokerConfig,

    /// Worker process supervision.
    pub worker: WorkerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutsConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Boards keyed by name.
    pub boards: BTreeMap<String, BoardConfig>,
}

impl Default for DigsConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.into(),
            project: DEFAULT_PROJECT.into(),
            broker: BrokerConfig::default(),
            worker: WorkerConfig::default(),
            timeouts: TimeoutsConfig::default(),
            logging: LoggingConfig::default(),
            boards: BTreeMap::new(),
        }
    }
}

impl DigsConfig {
    /// Serializes to TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Deserializes from TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Merges another config into this one.
    ///
    /// Values from `other` override values in `self` only if they
    /// differ from the default. Boards are merged by key, a board
    /// defined in `other` replacing the whole entry.
    pub fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.namespace != default.namespace {
            self.namespace = other.namespace.clone();
        }
        if other.project != default.project {
            self.project = other.project.clone();
        }

        self.broker.merge(&other.broker);
        self.worker.merge(&other.worker);
        self.timeouts.merge(&other.timeouts);
        self.logging.merge(&other.logging);

        for (key, board) in &other.boards {
            self.boards.insert(key.clone(), board.clone());
        }
    }
}

/// Broker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,

    /// Run a broker inside the central process instead of connecting
    /// to an external one.
    pub embedded: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            embedded: true,
        }
    }
}

impl BrokerConfig {
    /// `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.host != default.host {
            self.host = other.host.clone();
        }
        if other.port != default.port {
            self.port = other.port;
        }
        if other.embedded != default.embedded {
            self.embedded = other.embedded;
        }
    }
}

/// How worker processes are launched.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// A child OS process running `digs peon`.
    #[default]
    Process,
    /// A tokio task in the central process, driving simulated hardware.
    InProcess,
}

impl std::str::FromStr for WorkerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "process" => Ok(Self::Process),
            "in_process" => Ok(Self::InProcess),
            other => Err(format!("unknown worker mode '{other}'")),
        }
    }
}

/// Worker supervision configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub mode: WorkerMode,

    /// Worker executable. Defaults to the current executable.
    pub program: Option<PathBuf>,

    /// Worker arguments. Defaults to `["peon"]`.
    pub args: Vec<String>,

    /// Time allowed from spawn to a successful `init` reply.
    pub ready_timeout_ms: u64,

    /// Pause between failed attempts.
    pub retry_interval_ms: u64,

    /// Attempts before giving up.
    pub max_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            mode: WorkerMode::Process,
            program: None,
            args: Vec::new(),
            ready_timeout_ms: 10_000,
            retry_interval_ms: 30_000,
            max_retries: 3,
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.mode != default.mode {
            self.mode = other.mode;
        }
        if other.program.is_some() {
            self.program = other.program.clone();
        }
        if !other.args.is_empty() {
            self.args = other.args.clone();
        }
        if other.ready_timeout_ms != default.ready_timeout_ms {
            self.ready_timeout_ms = other.ready_timeout_ms;
        }
        if other.retry_interval_ms != default.retry_interval_ms {
            self.retry_interval_ms = other.retry_interval_ms;
        }
        if other.max_retries != default.max_retries {
            self.max_retries = other.max_retries;
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Per-request timeout in milliseconds. `0` disables it.
    pub request_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self { request_ms: 30_000 }
    }
}

impl TimeoutsConfig {
    /// The request timeout, or `None` when disabled.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_ms > 0).then(|| Duration::from_millis(self.request_ms))
    }

    fn merge(&mut self, other: &Self) {
        if other.request_ms != Self::default().request_ms {
            self.request_ms = other.request_ms;
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,

    /// Also write logs to this file.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

impl LoggingConfig {
    fn merge(&mut self, other: &Self) {
        if other.level != Self::default().level {
            self.level = other.level.clone();
        }
        if other.file.is_some() {
            self.file = other.file.clone();
        }
    }
}

/// One board and the components to create on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoardConfig {
    /// Explicit id. Derived from the name or key when absent.
    pub id: Option<String>,

    /// Human-readable name. Defaults to the config key.
    pub name: Option<String>,

    /// Hardware port, passed to the worker on `init`.
    pub port: Option<String>,

    /// Extra options passed to the worker on `init`.
    pub options: Map<String, Value>,

    pub components: Vec<ComponentConfig>,
}

impl BoardConfig {
    /// The `init` payload: options plus id and port, never components.
    #[must_use]
    pub fn init_options(&self, board_id: &str) -> Map<String, Value> {
        let mut opts = self.options.clone();
        opts.remove("components");
        opts.insert("id".into(), Value::String(board_id.to_string()));
        if let Some(port) = &self.port {
            opts.insert("port".into(), Value::String(port.clone()));
        }
        opts
    }
}

/// A component to instantiate when its board starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComponentConfig {
    /// Device class, e.g. `"led"` or `"motion-sensor"`.
    pub class: String,

    /// Explicit component id. Assigned by the worker when absent.
    pub id: Option<String>,

    pub options: Map<String, Value>,
}

impl ComponentConfig {
    /// Options sent with `instantiate`, including the id if one is set.
    #[must_use]
    pub fn instantiate_options(&self) -> Map<String, Value> {
        let mut opts = self.options.clone();
        if let Some(id) = &self.id {
            opts.insert("id".into(), Value::String(id.clone()));
        }
        opts
    }
}

//! Runtime layer for digs.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  digs-types, digs-protocol   (no I/O)                       │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Runtime Layer (THIS CRATE)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  broker/  : Connector seam, LocalBroker, TcpBroker          │
//! │  client/  : ChannelClient, FIFO request queue               │
//! │  worker/  : WorkerSupervisor, launchers, worker env         │
//! │  board/   : Board, Component                                │
//! │  peon/    : worker-side dispatcher, Hardware, SimHardware   │
//! │  config/  : DigsConfig, ConfigLoader                        │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │  digs-app (BoardRegistry, DigsApp) → digs-cli               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! ## [`broker`] - Transport
//!
//! Everything above talks to the broker through a [`Connector`](broker::Connector).
//! [`LocalBroker`](broker::LocalBroker) routes in memory;
//! [`TcpBroker`](broker::TcpBroker) serves the same routing over
//! newline-delimited frames for worker processes.
//!
//! ## [`client`] - Channel Client
//!
//! [`ChannelClient`](client::ChannelClient) publishes, subscribes and
//! issues requests. Requests are strictly FIFO: one in flight per
//! client, the next sent only when the head settles.
//!
//! ## [`worker`] - Supervision
//!
//! [`WorkerSupervisor`](worker::WorkerSupervisor) launches a worker,
//! waits for it to come online, initializes it and retries on failure.
//!
//! ## [`board`] - Boards and Components
//!
//! [`Board`](board::Board) ties a supervisor to a set of
//! [`Component`](board::Component) proxies.
//!
//! ## [`peon`] - Worker Side
//!
//! [`Peon`](peon::Peon) answers `init`, `instantiate`, `dir` and
//! `execute` against a [`Hardware`](peon::Hardware) backend.
//!
//! ## [`config`] - Configuration
//!
//! Configuration priority: Environment > Project > Global > Default

pub mod board;
pub mod broker;
pub mod client;
pub mod config;
pub mod peon;
pub mod worker;

// Re-exports for convenience
pub use board::{
    normalize_class, Board, BoardContext, BoardError, BoardSnapshot, Component, ComponentError,
    ComponentSnapshot,
};
pub use broker::{
    BrokerError, Connection, Connector, Link, LocalBroker, Packet, TcpBroker, TcpConnector,
};
pub use client::{
    ChannelClient, ClientBuilder, ClientError, ClientEvent, ClientEvents, Responder,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use config::{
    default_config_dir, default_config_path, BoardConfig, ComponentConfig, ConfigError,
    ConfigLoader, DigsConfig, WorkerMode,
};
pub use peon::{Hardware, InProcessLauncher, Peon, SimHardware};
pub use worker::{
    Launcher, ProcessLauncher, WorkerEnv, WorkerError, WorkerIdentity, WorkerSettings,
    WorkerState, WorkerSupervisor,
};

//! digs Application Layer.
//!
//! This crate provides:
//!
//! - **[`BoardRegistry`]**: every configured board under a unique id
//! - **[`DigsApp`]**: broker, launcher and registry wired from config
//! - **[`AppError`]**: unified application-level error type
//! - **Re-exports**: convenient access to the runtime types a frontend needs
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  digs-types, digs-protocol                                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  digs-runtime (broker, client, worker, board, peon, config) │
//! ├─────────────────────────────────────────────────────────────┤
//! │  digs-app (registry + app + AppError)        ◄── HERE       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  digs-cli (uses AppError → anyhow)                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Error Handling Strategy
//!
//! ```text
//! Internal Errors (BoardError, BrokerError, ConfigError, ...)
//!                    ↓ From impl
//!               AppError (this crate)
//!                    ↓ anyhow::Error
//!               CLI output
//! ```

mod app;
mod error;
mod registry;

pub use app::{DigsApp, DigsAppBuilder};
pub use error::AppError;
pub use registry::{BoardRegistry, StartReport};

pub use digs_protocol::{DEFAULT_NAMESPACE, DEFAULT_PROJECT};
pub use digs_runtime::{
    Board, BoardSnapshot, Component, ComponentSnapshot, ConfigError, ConfigLoader, DigsConfig,
    Peon, SimHardware, TcpBroker, TcpConnector, WorkerEnv, WorkerMode,
};
pub use digs_types::ErrorCode;

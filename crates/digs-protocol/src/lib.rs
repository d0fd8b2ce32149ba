//! Wire protocol for the digs publish/subscribe channel.
//!
//! # Overview
//!
//! The central process and each board worker talk exclusively through a
//! topic-addressed broker. This crate defines everything that crosses
//! that boundary, without doing any I/O:
//!
//! ```text
//!  namespace / project / sender / path [/wildcard] [~req-N]
//!  ─────────   ───────   ──────   ────  ──────────  ───────
//!      │          │         │       │        │          └─ request correlation
//!      │          │         │       │        └─ subscription patterns only
//!      │          │         │       └─ message kind / command name
//!      └──────────┴─────────┴─ bus scope and identity
//! ```
//!
//! | Type | Role |
//! |------|------|
//! | [`Topic`] | Encode/decode the address above |
//! | [`Message`] | Tagged body: `Online`, `Ready`, `Log`, `Error`, `Command` |
//! | [`Command`] | Typed worker commands: `init`, `instantiate`, `dir`, `execute` |
//! | [`ProtocolError`] / [`TopicError`] | Decode and serialization failures |
//!
//! # Example
//!
//! ```
//! use digs_protocol::{RequestId, Topic};
//!
//! let topic = Topic::builder("digs", "home", "uno-1")
//!     .path("init")
//!     .request_id(RequestId::new(7))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(topic.to_string(), "digs/home/uno-1/init~req-7");
//! assert_eq!(Topic::decode(&topic.to_string()).unwrap(), topic);
//! ```

pub mod command;
mod error;
pub mod message;
pub mod topic;

pub use command::{
    Command, DirReply, DirRequest, ErrorReply, ExecuteRequest, InitReply, InstantiateReply,
    InstantiateRequest,
};
pub use error::{ProtocolError, TopicError};
pub use message::{Fault, LogLevel, LogRecord, Message, Online, Ready};
pub use topic::{filter_matches, RequestId, Topic, TopicBuilder, Wildcard};

/// Default topic namespace.
pub const DEFAULT_NAMESPACE: &str = "digs";

/// Default topic project.
pub const DEFAULT_PROJECT: &str = "home";

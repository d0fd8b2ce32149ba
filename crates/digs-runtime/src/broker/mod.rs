//! Broker transport seam.
//!
//! The channel client never talks to a socket directly. It asks a
//! [`Connector`] for a [`Connection`], which is a [`Link`] for outbound
//! operations plus an inbound packet stream:
//!
//! ```text
//!            ┌──────────────┐   connect(client_id)   ┌──────────────┐
//!            │ ChannelClient├───────────────────────►│  Connector   │
//!            └──────┬───────┘                        └──────┬───────┘
//!                   │                                       │
//!      subscribe /  │ publish                                │ Connection
//!                   ▼                                       ▼
//!            ┌──────────────┐                        ┌──────────────┐
//!            │  dyn Link    │                        │ inbound rx   │── None = connection lost
//!            └──────────────┘                        └──────────────┘
//! ```
//!
//! Two implementations ship with the crate:
//!
//! | Type | Use |
//! |------|-----|
//! | [`LocalBroker`] | In-memory routing. Tests and single-process runs. |
//! | [`TcpBroker`] + [`TcpConnector`] | Line-delimited JSON over TCP for worker processes. |
//!
//! Delivery is at most once. A session receives a packet once even when
//! several of its filters match.

mod local;
mod tcp;

pub use local::LocalBroker;
pub use tcp::{TcpBroker, TcpConnector};

use async_trait::async_trait;
use digs_types::ErrorCode;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// A raw message as carried by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub topic: String,
    pub payload: String,
}

impl Packet {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Outbound half of a broker session.
#[async_trait]
pub trait Link: Send + Sync + fmt::Debug {
    /// Registers an MQTT-style filter for this session.
    ///
    /// Resolves once the filter is routable: a packet published by anyone
    /// afterwards is matched against it.
    async fn subscribe(&self, filter: &str) -> Result<(), BrokerError>;

    /// Publishes a packet to every matching session.
    async fn publish(&self, packet: Packet) -> Result<(), BrokerError>;

    /// Ends the session. The inbound stream closes shortly after.
    ///
    /// Idempotent.
    fn close(&self);
}

/// An open broker session.
#[derive(Debug)]
pub struct Connection {
    pub link: Arc<dyn Link>,
    /// Closes (yields `None`) when the session ends for any reason.
    pub inbound: mpsc::UnboundedReceiver<Packet>,
}

/// Opens broker sessions.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Connects as `client_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unreachable`] or [`BrokerError::Closed`]
    /// if no session can be opened.
    async fn connect(&self, client_id: &str) -> Result<Connection, BrokerError>;
}

/// Broker transport errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker endpoint could not be reached.
    #[error("broker at '{endpoint}' is unreachable: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The session or the broker has been shut down.
    #[error("broker session is closed")]
    Closed,

    /// A socket read or write failed mid-session.
    #[error("broker I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A peer sent a frame that could not be understood.
    #[error("invalid broker frame: {reason}")]
    Frame { reason: String },
}

impl ErrorCode for BrokerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unreachable { .. } => "BROKER_UNREACHABLE",
            Self::Closed => "BROKER_CLOSED",
            Self::Io(_) => "BROKER_IO",
            Self::Frame { .. } => "BROKER_FRAME",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Frame { .. })
    }
}

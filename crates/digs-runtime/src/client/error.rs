//! Channel client errors.
//!
//! | Error | Code | Recoverable |
//! |-------|------|-------------|
//! | [`ClientError::Broker`] | `CHANNEL_BROKER` | Yes |
//! | [`ClientError::Topic`] | `CHANNEL_TOPIC` | No |
//! | [`ClientError::Serialization`] | `CHANNEL_SERIALIZATION` | No |
//! | [`ClientError::Protocol`] | `CHANNEL_MALFORMED_MESSAGE` | No |
//! | [`ClientError::Disconnected`] | `CHANNEL_DISCONNECTED` | Yes |
//! | [`ClientError::Timeout`] | `CHANNEL_TIMEOUT` | Yes |

use crate::broker::BrokerError;
use digs_protocol::{ProtocolError, RequestId, TopicError};
use digs_types::ErrorCode;
use thiserror::Error;

/// Errors surfaced by [`ChannelClient`](super::ChannelClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The broker could not be reached or rejected an operation.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// A topic built from client input was invalid.
    #[error(transparent)]
    Topic(#[from] TopicError),

    /// An outbound message is not representable as JSON.
    #[error("message could not be serialized: {0}")]
    Serialization(#[source] ProtocolError),

    /// A response arrived but its body could not be decoded.
    #[error(transparent)]
    Protocol(ProtocolError),

    /// The broker connection was lost or closed while the request was pending.
    #[error("broker connection lost")]
    Disconnected,

    /// No response arrived in time.
    #[error("request {request_id} timed out after {timeout_ms}ms")]
    Timeout {
        request_id: RequestId,
        timeout_ms: u64,
    },
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Serialization { .. } => Self::Serialization(err),
            ProtocolError::Topic(topic) => Self::Topic(topic),
            other => Self::Protocol(other),
        }
    }
}

impl ErrorCode for ClientError {
    fn code(&self) -> &'static str {
        match self {
            Self::Broker(_) => "CHANNEL_BROKER",
            Self::Topic(_) => "CHANNEL_TOPIC",
            Self::Serialization(_) => "CHANNEL_SERIALIZATION",
            Self::Protocol(_) => "CHANNEL_MALFORMED_MESSAGE",
            Self::Disconnected => "CHANNEL_DISCONNECTED",
            Self::Timeout { .. } => "CHANNEL_TIMEOUT",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Broker(_) | Self::Disconnected | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digs_types::assert_error_codes;

    #[test]
    fn error_codes() {
        assert_error_codes(
            &[
                ClientError::Broker(BrokerError::Closed),
                ClientError::Topic(TopicError::MissingPath),
                ClientError::from(ProtocolError::UnknownCommand { name: "x".into() }),
                ClientError::Disconnected,
                ClientError::Timeout {
                    request_id: RequestId::new(1),
                    timeout_ms: 10,
                },
            ],
            "CHANNEL_",
        );
    }

    #[test]
    fn protocol_errors_are_sorted() {
        let bad_json = serde_json::from_str::<serde_json::Value>("[").unwrap_err();
        assert!(matches!(
            ClientError::from(ProtocolError::Serialization { source: bad_json }),
            ClientError::Serialization(_)
        ));
        assert!(matches!(
            ClientError::from(ProtocolError::Topic(TopicError::MissingPath)),
            ClientError::Topic(_)
        ));
        assert!(matches!(
            ClientError::from(ProtocolError::malformed("dir", "nope")),
            ClientError::Protocol(_)
        ));
        assert!(ClientError::Disconnected.is_recoverable());
    }
}

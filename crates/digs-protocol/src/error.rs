//! Protocol layer errors.
//!
//! | Error | Code | Recoverable |
//! |-------|------|-------------|
//! | [`TopicError::EmptyField`] | `TOPIC_EMPTY_FIELD` | No |
//! | [`TopicError::ReservedCharacter`] | `TOPIC_RESERVED_CHARACTER` | No |
//! | [`TopicError::EmptySegment`] | `TOPIC_EMPTY_SEGMENT` | No |
//! | [`TopicError::MissingPath`] | `TOPIC_MISSING_PATH` | No |
//! | [`TopicError::Malformed`] | `TOPIC_MALFORMED` | No |
//! | [`TopicError::Ambiguous`] | `TOPIC_AMBIGUOUS` | No |
//! | [`TopicError::InvalidRequestId`] | `TOPIC_INVALID_REQUEST_ID` | No |
//! | [`ProtocolError::MalformedMessage`] | `PROTOCOL_MALFORMED_MESSAGE` | No |
//! | [`ProtocolError::Serialization`] | `PROTOCOL_SERIALIZATION` | No |
//! | [`ProtocolError::UnknownCommand`] | `PROTOCOL_UNKNOWN_COMMAND` | No |
//!
//! None of these are recoverable: the same bytes will fail the same way.
//! They are reported at the dispatch boundary and never tear down a
//! connection.

use digs_types::ErrorCode;
use thiserror::Error;

/// A topic could not be built or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// A scope field (namespace, project, sender) was empty.
    #[error("topic field '{field}' must not be empty")]
    EmptyField { field: &'static str },

    /// A field contained `/`, `~`, `+`, `#` or whitespace.
    #[error("topic field '{field}' contains a reserved character: '{value}'")]
    ReservedCharacter { field: &'static str, value: String },

    /// The path had an empty segment (`a//b`, leading or trailing `/`).
    #[error("topic path '{path}' has an empty segment")]
    EmptySegment { path: String },

    /// A concrete (non-wildcard) topic had no path.
    #[error("topic path must not be empty unless the topic is a wildcard pattern")]
    MissingPath,

    /// The string does not have the `ns/project/sender/path` shape.
    #[error("malformed topic '{topic}'")]
    Malformed { topic: String },

    /// The string carries both a wildcard and a request suffix.
    #[error("topic '{topic}' carries both a wildcard and a request id")]
    Ambiguous { topic: String },

    /// The request suffix is not `req-<digits>`.
    #[error("invalid request id '{value}'")]
    InvalidRequestId { value: String },
}

impl ErrorCode for TopicError {
    fn code(&self) -> &'static str {
        match self {
            Self::EmptyField { .. } => "TOPIC_EMPTY_FIELD",
            Self::ReservedCharacter { .. } => "TOPIC_RESERVED_CHARACTER",
            Self::EmptySegment { .. } => "TOPIC_EMPTY_SEGMENT",
            Self::MissingPath => "TOPIC_MISSING_PATH",
            Self::Malformed { .. } => "TOPIC_MALFORMED",
            Self::Ambiguous { .. } => "TOPIC_AMBIGUOUS",
            Self::InvalidRequestId { .. } => "TOPIC_INVALID_REQUEST_ID",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// A message body could not be decoded or encoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The topic itself was invalid.
    #[error(transparent)]
    Topic(#[from] TopicError),

    /// The payload was not JSON, or not the shape its path requires.
    #[error("malformed message on '{path}': {reason}")]
    MalformedMessage { path: String, reason: String },

    /// An outbound payload is not representable as JSON.
    #[error("message is not representable as JSON: {source}")]
    Serialization {
        #[source]
        source: serde_json::Error,
    },

    /// A request named a command the receiver does not implement.
    #[error("unknown command '{name}'")]
    UnknownCommand { name: String },
}

impl ProtocolError {
    /// Creates a malformed message error.
    pub fn malformed(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedMessage {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::Topic(inner) => inner.code(),
            Self::MalformedMessage { .. } => "PROTOCOL_MALFORMED_MESSAGE",
            Self::Serialization { .. } => "PROTOCOL_SERIALIZATION",
            Self::UnknownCommand { .. } => "PROTOCOL_UNKNOWN_COMMAND",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digs_types::assert_error_codes;

    #[test]
    fn topic_error_codes() {
        assert_error_codes(
            &[
                TopicError::EmptyField { field: "namespace" },
                TopicError::ReservedCharacter {
                    field: "path",
                    value: "a~b".into(),
                },
                TopicError::EmptySegment { path: "a//b".into() },
                TopicError::MissingPath,
                TopicError::Malformed { topic: "x".into() },
                TopicError::Ambiguous {
                    topic: "a/b/c/#~req-1".into(),
                },
                TopicError::InvalidRequestId { value: "r".into() },
            ],
            "TOPIC_",
        );
    }

    #[test]
    fn protocol_error_codes() {
        let bad_json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_error_codes(
            &[
                ProtocolError::malformed("online", "missing clientId"),
                ProtocolError::Serialization { source: bad_json },
                ProtocolError::UnknownCommand {
                    name: "reboot".into(),
                },
            ],
            "PROTOCOL_",
        );
    }

    #[test]
    fn topic_variant_forwards_code() {
        let err = ProtocolError::from(TopicError::MissingPath);
        assert_eq!(err.code(), "TOPIC_MISSING_PATH");
        assert!(!err.is_recoverable());
    }
}

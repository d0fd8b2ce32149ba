//! Message bodies.
//!
//! The path of a topic selects how its JSON body is read:
//!
//! | Path | Variant | Body |
//! |------|---------|------|
//! | `online` | [`Message::Online`] | `{"clientId": "..."}` |
//! | `ready` | [`Message::Ready`] | `{"id": "...", "port": "..."?}` |
//! | `log` | [`Message::Log`] | `{"level": "info", "message": "..."}` |
//! | `error` | [`Message::Error`] | `{"message": "..."}` |
//! | anything else | [`Message::Command`] | any JSON value |
//!
//! Requests and their replies share the command's path, so a reply to
//! `init` is also a `Command { name: "init", .. }`; the request id on
//! the topic is what ties the two together.

use crate::ProtocolError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved paths with a fixed body shape.
pub mod paths {
    pub const ONLINE: &str = "online";
    pub const READY: &str = "ready";
    pub const LOG: &str = "log";
    pub const ERROR: &str = "error";
}

/// Announcement published by every client right after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Online {
    pub client_id: String,
}

/// A worker finished initializing its hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

/// Severity of a forwarded log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A log line forwarded from a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
}

/// An error reported out of band by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub message: String,
}

/// A decoded message body, tagged by its topic path.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Online(Online),
    Ready(Ready),
    Log(LogRecord),
    Error(Fault),
    /// Any other path: a command request, its reply, or an application event.
    Command { name: String, payload: Value },
}

impl Message {
    /// Builds a command message from any serializable payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Serialization`] if `payload` cannot be
    /// represented as JSON (for example a map with non-string keys).
    pub fn command(name: impl Into<String>, payload: &impl Serialize) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_value(payload)
            .map_err(|source| ProtocolError::Serialization { source })?;
        Ok(Self::Command {
            name: name.into(),
            payload,
        })
    }

    /// Builds a `log` message.
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log(LogRecord {
            level,
            message: message.into(),
        })
    }

    /// The topic path this message is published on.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Online(_) => paths::ONLINE,
            Self::Ready(_) => paths::READY,
            Self::Log(_) => paths::LOG,
            Self::Error(_) => paths::ERROR,
            Self::Command { name, .. } => name,
        }
    }

    /// Decodes a body received on `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedMessage`] if the body is not
    /// JSON or does not match the shape required by a reserved path.
    pub fn decode(path: &str, body: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| ProtocolError::malformed(path, e))?;

        let shape = |e: serde_json::Error| ProtocolError::malformed(path, e);
        let message = match path {
            paths::ONLINE => Self::Online(serde_json::from_value(value).map_err(shape)?),
            paths::READY => Self::Ready(serde_json::from_value(value).map_err(shape)?),
            paths::LOG => Self::Log(serde_json::from_value(value).map_err(shape)?),
            paths::ERROR => Self::Error(serde_json::from_value(value).map_err(shape)?),
            _ => Self::Command {
                name: path.to_string(),
                payload: value,
            },
        };
        Ok(message)
    }

    /// Encodes the body as a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Serialization`] if encoding fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let encoded = match self {
            Self::Online(body) => serde_json::to_string(body),
            Self::Ready(body) => serde_json::to_string(body),
            Self::Log(body) => serde_json::to_string(body),
            Self::Error(body) => serde_json::to_string(body),
            Self::Command { payload, .. } => serde_json::to_string(payload),
        };
        encoded.map_err(|source| ProtocolError::Serialization { source })
    }

    /// Returns the body as a JSON value.
    #[must_use]
    pub fn into_payload(self) -> Value {
        match self {
            Self::Command { payload, .. } => payload,
            Self::Online(body) => serde_json::to_value(body).unwrap_or(Value::Null),
            Self::Ready(body) => serde_json::to_value(body).unwrap_or(Value::Null),
            Self::Log(body) => serde_json::to_value(body).unwrap_or(Value::Null),
            Self::Error(body) => serde_json::to_value(body).unwrap_or(Value::Null),
        }
    }

    /// Reads the body as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedMessage`] if the body does not
    /// have the shape of `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let path = self.path().to_string();
        serde_json::from_value(self.clone().into_payload())
            .map_err(|e| ProtocolError::malformed(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn decode_reserved_paths() {
        assert_eq!(
            Message::decode("online", r#"{"clientId":"uno-1-peon"}"#).unwrap(),
            Message::Online(Online {
                client_id: "uno-1-peon".into()
            })
        );
        assert_eq!(
            Message::decode("ready", r#"{"id":"uno","port":"/dev/ttyACM0"}"#).unwrap(),
            Message::Ready(Ready {
                id: "uno".into(),
                port: Some("/dev/ttyACM0".into())
            })
        );
        assert_eq!(
            Message::decode("log", r#"{"level":"warn","message":"low battery"}"#).unwrap(),
            Message::log(LogLevel::Warn, "low battery")
        );
        assert!(matches!(
            Message::decode("error", r#"{"message":"boom"}"#).unwrap(),
            Message::Error(Fault { .. })
        ));
    }

    #[test]
    fn other_paths_are_commands() {
        let msg = Message::decode("execute", r#"{"id":"Led-1","method":"on","args":[]}"#).unwrap();
        assert_eq!(msg.path(), "execute");
        match msg {
            Message::Command { name, payload } => {
                assert_eq!(name, "execute");
                assert_eq!(payload["method"], "on");
            }
            other => panic!("expected Command, got: {other:?}"),
        }
    }

    #[test]
    fn scalar_reply_is_a_command() {
        let msg = Message::decode("execute", "42").unwrap();
        assert_eq!(msg.into_payload(), json!(42));
    }

    #[test]
    fn malformed_json() {
        match Message::decode("execute", "{not json") {
            Err(ProtocolError::MalformedMessage { path, .. }) => assert_eq!(path, "execute"),
            other => panic!("expected MalformedMessage, got: {other:?}"),
        }
    }

    #[test]
    fn malformed_shape_on_reserved_path() {
        match Message::decode("online", r#"{"id":1}"#) {
            Err(ProtocolError::MalformedMessage { path, .. }) => assert_eq!(path, "online"),
            other => panic!("expected MalformedMessage, got: {other:?}"),
        }
    }

    #[test]
    fn encode_matches_wire_shape() {
        let online = Message::Online(Online {
            client_id: "central".into(),
        });
        assert_eq!(online.encode().unwrap(), r#"{"clientId":"central"}"#);

        let ready = Message::Ready(Ready {
            id: "uno".into(),
            port: None,
        });
        assert_eq!(ready.encode().unwrap(), r#"{"id":"uno"}"#);
    }

    #[test]
    fn command_with_unrepresentable_payload() {
        let mut bad: HashMap<(u8, u8), &str> = HashMap::new();
        bad.insert((1, 2), "x");
        match Message::command("execute", &bad) {
            Err(ProtocolError::Serialization { .. }) => {}
            other => panic!("expected Serialization, got: {other:?}"),
        }
    }

    #[test]
    fn payload_as_typed() {
        let msg = Message::command("init", &json!({"id": "uno", "port": "COM3"})).unwrap();
        let ready: Ready = msg.payload_as().unwrap();
        assert_eq!(ready.port.as_deref(), Some("COM3"));

        let err = msg.payload_as::<Online>().unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedMessage { .. }));
    }
}

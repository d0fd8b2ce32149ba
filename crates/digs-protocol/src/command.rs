//! Worker commands and their reply payloads.
//!
//! ```text
//!  central                                   worker (peon)
//!     │  init {..board options}                   │
//!     ├──────────────────────────────────────────►│  open hardware
//!     │◄──────────────────────────────────────────┤  {id, port?}
//!     │  instantiate {componentClass, opts}       │
//!     ├──────────────────────────────────────────►│  construct device
//!     │◄──────────────────────────────────────────┤  {id, componentClass}
//!     │  dir {id} | {componentClass}              │
//!     ├──────────────────────────────────────────►│  list public methods
//!     │◄──────────────────────────────────────────┤  {methods: [..]}
//!     │  execute {id, method, args}               │
//!     ├──────────────────────────────────────────►│  invoke
//!     │◄──────────────────────────────────────────┤  <value> | {error}
//! ```
//!
//! Failures inside the worker come back as an [`ErrorReply`] body, not
//! as a transport failure.

use crate::{Message, ProtocolError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const INIT: &str = "init";
pub const INSTANTIATE: &str = "instantiate";
pub const DIR: &str = "dir";
pub const EXECUTE: &str = "execute";

/// Reply to `init`.
///
/// An empty `id` means the worker did not come up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReply {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantiateRequest {
    pub component_class: String,
    #[serde(default)]
    pub opts: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantiateReply {
    pub id: String,
    pub component_class: String,
}

/// `dir` target: a live component, or a class the hardware can build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DirRequest {
    Id {
        id: String,
    },
    Class {
        #[serde(rename = "componentClass")]
        component_class: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirReply {
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Error body returned in place of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
}

impl ErrorReply {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Extracts the error text if `value` is an error body.
    ///
    /// An error body is an object whose `error` field is a string.
    #[must_use]
    pub fn detect(value: &Value) -> Option<&str> {
        value.as_object()?.get("error")?.as_str()
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        let mut body = Map::new();
        body.insert("error".into(), Value::String(self.error));
        Value::Object(body)
    }
}

/// A parsed worker command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Board options, minus component definitions.
    Init(Map<String, Value>),
    Instantiate(InstantiateRequest),
    Dir(DirRequest),
    Execute(ExecuteRequest),
}

impl Command {
    /// Parses a command request body.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnknownCommand`] for an unrecognized name.
    /// - [`ProtocolError::MalformedMessage`] if the payload has the
    ///   wrong shape.
    pub fn parse(name: &str, payload: Value) -> Result<Self, ProtocolError> {
        let shape = |e: serde_json::Error| ProtocolError::malformed(name, e);
        let command = match name {
            INIT => Self::Init(serde_json::from_value(payload).map_err(shape)?),
            INSTANTIATE => Self::Instantiate(serde_json::from_value(payload).map_err(shape)?),
            DIR => Self::Dir(serde_json::from_value(payload).map_err(shape)?),
            EXECUTE => Self::Execute(serde_json::from_value(payload).map_err(shape)?),
            other => {
                return Err(ProtocolError::UnknownCommand {
                    name: other.to_string(),
                })
            }
        };
        Ok(command)
    }

    /// The command name, which is also its topic path.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init(_) => INIT,
            Self::Instantiate(_) => INSTANTIATE,
            Self::Dir(_) => DIR,
            Self::Execute(_) => EXECUTE,
        }
    }

    /// Wraps the command as a message ready to send.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Serialization`] if an argument cannot be
    /// represented as JSON.
    pub fn into_message(self) -> Result<Message, ProtocolError> {
        let name = self.name();
        match self {
            Self::Init(options) => Message::command(name, &options),
            Self::Instantiate(body) => Message::command(name, &body),
            Self::Dir(body) => Message::command(name, &body),
            Self::Execute(body) => Message::command(name, &body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_each_command() {
        let init = Command::parse(INIT, json!({"id": "uno", "port": "COM3"})).unwrap();
        assert!(matches!(init, Command::Init(ref opts) if opts["port"] == "COM3"));

        let inst = Command::parse(
            INSTANTIATE,
            json!({"componentClass": "Led", "opts": {"pin": 13}}),
        )
        .unwrap();
        match inst {
            Command::Instantiate(req) => {
                assert_eq!(req.component_class, "Led");
                assert_eq!(req.opts["pin"], 13);
            }
            other => panic!("expected Instantiate, got: {other:?}"),
        }

        assert_eq!(
            Command::parse(DIR, json!({"id": "Led-1"})).unwrap(),
            Command::Dir(DirRequest::Id { id: "Led-1".into() })
        );
        assert_eq!(
            Command::parse(DIR, json!({"componentClass": "Led"})).unwrap(),
            Command::Dir(DirRequest::Class {
                component_class: "Led".into()
            })
        );

        let exec = Command::parse(EXECUTE, json!({"id": "Led-1", "method": "on"})).unwrap();
        match exec {
            Command::Execute(req) => assert!(req.args.is_empty()),
            other => panic!("expected Execute, got: {other:?}"),
        }
    }

    #[test]
    fn unknown_command() {
        match Command::parse("reboot", json!({})) {
            Err(ProtocolError::UnknownCommand { name }) => assert_eq!(name, "reboot"),
            other => panic!("expected UnknownCommand, got: {other:?}"),
        }
    }

    #[test]
    fn wrong_shape_is_malformed() {
        match Command::parse(EXECUTE, json!({"id": "Led-1"})) {
            Err(ProtocolError::MalformedMessage { path, .. }) => assert_eq!(path, EXECUTE),
            other => panic!("expected MalformedMessage, got: {other:?}"),
        }
        assert!(Command::parse(INIT, json!([1, 2])).is_err());
    }

    #[test]
    fn into_message_uses_wire_field_names() {
        let msg = Command::Instantiate(InstantiateRequest {
            component_class: "Sensor".into(),
            opts: Map::new(),
        })
        .into_message()
        .unwrap();
        assert_eq!(msg.path(), INSTANTIATE);
        assert_eq!(
            msg.into_payload(),
            json!({"componentClass": "Sensor", "opts": {}})
        );
    }

    #[test]
    fn error_reply_detection() {
        assert_eq!(
            ErrorReply::detect(&json!({"error": "No component"})),
            Some("No component")
        );
        assert_eq!(ErrorReply::detect(&json!({"error": 1})), None);
        assert_eq!(ErrorReply::detect(&json!(true)), None);
        assert_eq!(
            ErrorReply::new("boom").into_value(),
            json!({"error": "boom"})
        );
    }

    #[test]
    fn init_reply_tolerates_missing_id() {
        let reply: InitReply = serde_json::from_value(json!({})).unwrap();
        assert!(reply.id.is_empty());
    }
}

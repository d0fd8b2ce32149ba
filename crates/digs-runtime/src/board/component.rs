//! Remote component proxies.
//!
//! A [`Component`] stands in for a device that lives inside the
//! worker. It starts unbound; [`Component::instantiate`] asks the worker
//! to build the device and then to describe it, and only the methods it
//! lists can be called.

use super::{Board, ComponentError};
use digs_protocol::{
    Command, DirReply, DirRequest, ErrorReply, ExecuteRequest, InstantiateReply,
    InstantiateRequest, Message,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Serializable view of a component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSnapshot {
    pub id: Option<String>,
    pub component_class: String,
    pub methods: Vec<String>,
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct Binding {
    id: String,
    methods: Vec<String>,
}

/// Proxy for a device inside a worker.
#[derive(Debug)]
pub struct Component {
    component_class: String,
    options: Map<String, Value>,
    board_id: String,
    board: Weak<Board>,
    binding: Option<Binding>,
}

impl Component {
    /// Creates an unbound proxy. `class` is normalized to `CamelCase`.
    pub fn new(board: &Arc<Board>, class: &str, options: Map<String, Value>) -> Self {
        Self {
            component_class: normalize_class(class),
            options,
            board_id: board.id().to_string(),
            board: Arc::downgrade(board),
            binding: None,
        }
    }

    /// Creates the device in the worker and discovers its methods.
    ///
    /// # Errors
    ///
    /// - [`ComponentError::Rejected`] if the worker answers `{error}`.
    /// - [`ComponentError::BoardOffline`] if the board is gone or not ready.
    /// - [`ComponentError::Channel`] for transport failures.
    pub async fn instantiate(&mut self) -> Result<(), ComponentError> {
        let created: InstantiateReply = self
            .send(Command::Instantiate(InstantiateRequest {
                component_class: self.component_class.clone(),
                opts: self.options.clone(),
            }))
            .await?;

        let described: DirReply = self
            .send(Command::Dir(DirRequest::Id {
                id: created.id.clone(),
            }))
            .await?;

        let methods: Vec<String> = described
            .methods
            .into_iter()
            .filter(|m| !m.starts_with('_'))
            .collect();
        debug!(
            board = %self.board_id,
            component = %created.id,
            class = %self.component_class,
            methods = ?methods,
            "component bound"
        );
        self.binding = Some(Binding {
            id: created.id,
            methods,
        });
        Ok(())
    }

    async fn send<T: DeserializeOwned>(&self, command: Command) -> Result<T, ComponentError> {
        let reply = self.request(command).await?;
        if let Some(error) = ErrorReply::detect(&reply) {
            return Err(ComponentError::Rejected {
                class: self.component_class.clone(),
                message: error.to_string(),
            });
        }
        serde_json::from_value(reply).map_err(|e| ComponentError::InvalidReply {
            class: self.component_class.clone(),
            reason: e.to_string(),
        })
    }

    async fn request(&self, command: Command) -> Result<Value, ComponentError> {
        let board = self.board.upgrade().ok_or_else(|| ComponentError::BoardOffline {
            board: self.board_id.clone(),
        })?;
        let message: Message = command
            .into_message()
            .map_err(|e| ComponentError::Channel(e.into()))?;
        Ok(board.request(message).await?.into_payload())
    }

    /// Invokes `method` on the device and returns its result.
    ///
    /// # Errors
    ///
    /// - [`ComponentError::Unbound`] before a successful [`instantiate`](Self::instantiate).
    /// - [`ComponentError::UnknownMethod`] for a method not listed by the
    ///   worker. Nothing is sent.
    /// - [`ComponentError::Device`] if the device reported an error.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, ComponentError> {
        let binding = self.binding.as_ref().ok_or_else(|| ComponentError::Unbound {
            class: self.component_class.clone(),
        })?;
        if !binding.methods.iter().any(|m| m == method) {
            return Err(ComponentError::UnknownMethod {
                id: binding.id.clone(),
                method: method.to_string(),
            });
        }

        let reply = self
            .request(Command::Execute(ExecuteRequest {
                id: binding.id.clone(),
                method: method.to_string(),
                args,
            }))
            .await?;
        if let Some(error) = ErrorReply::detect(&reply) {
            return Err(ComponentError::Device {
                id: binding.id.clone(),
                method: method.to_string(),
                message: error.to_string(),
            });
        }
        Ok(reply)
    }

    /// Worker-assigned id, once bound.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.id.as_str())
    }

    #[must_use]
    pub fn component_class(&self) -> &str {
        &self.component_class
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Callable methods. Empty until bound.
    #[must_use]
    pub fn methods(&self) -> &[String] {
        self.binding
            .as_ref()
            .map(|b| b.methods.as_slice())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_method(&self, method: &str) -> bool {
        self.methods().iter().any(|m| m == method)
    }

    #[must_use]
    pub fn snapshot(&self) -> ComponentSnapshot {
        ComponentSnapshot {
            id: self.id().map(str::to_string),
            component_class: self.component_class.clone(),
            methods: self.methods().to_vec(),
            options: self.options.clone(),
        }
    }
}

/// Converts a class name to `CamelCase`.
///
/// Words are split on separators and case changes, so `motion-sensor`,
/// `motion_sensor` and `MotionSensor` all become `MotionSensor`, and
/// `RGBLed` becomes `RgbLed`.
#[must_use]
pub fn normalize_class(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_numeric() || (prev.is_uppercase() && next_is_lower) {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|word| {
            let mut letters = word.chars();
            match letters.next() {
                Some(first) => first.to_uppercase().chain(letters.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect()
}

//! Hardware seam for the worker side.
//!
//! A [`Hardware`] opens the physical board and builds [`Device`]s on
//! it. Method names starting with `_` are private: they exist on the
//! device but are never listed or callable over the channel.

use async_trait::async_trait;
use digs_types::ErrorCode;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Failures reported by hardware or a device.
///
/// The display text is sent verbatim to the central process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("Unknown component \"{class}\"")]
    UnknownClass { class: String },

    #[error("{message}")]
    Failed { message: String },
}

impl DeviceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

impl ErrorCode for DeviceError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownClass { .. } => "DEVICE_UNKNOWN_CLASS",
            Self::Failed { .. } => "DEVICE_FAILED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// What opening the board revealed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardInfo {
    pub port: Option<String>,
}

/// A hardware-control library.
#[async_trait]
pub trait Hardware: Send + Sync + fmt::Debug {
    /// Connects to the board described by the `init` options.
    async fn open(&self, options: &Map<String, Value>) -> Result<BoardInfo, DeviceError>;

    /// Builds a device of `class` on the open board.
    fn create(&self, class: &str, options: &Map<String, Value>)
        -> Result<Box<dyn Device>, DeviceError>;

    /// Every method a device of `class` has, private ones included.
    fn class_methods(&self, class: &str) -> Result<Vec<String>, DeviceError>;
}

/// A live hardware object.
pub trait Device: Send + fmt::Debug {
    /// Every method name, private ones included.
    fn methods(&self) -> Vec<String>;

    fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Value, DeviceError>;
}

/// Drops private (`_`-prefixed) names.
#[must_use]
pub fn public_methods(methods: Vec<String>) -> Vec<String> {
    methods.into_iter().filter(|m| !m.starts_with('_')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use digs_types::assert_error_codes;

    #[test]
    fn private_methods_are_dropped() {
        let methods = vec!["on".into(), "_reset".into(), "off".into()];
        assert_eq!(public_methods(methods), vec!["on", "off"]);
    }

    #[test]
    fn error_texts() {
        assert_eq!(
            DeviceError::UnknownClass { class: "Bogus".into() }.to_string(),
            "Unknown component \"Bogus\""
        );
        assert_error_codes(
            &[
                DeviceError::UnknownClass { class: "X".into() },
                DeviceError::failed("stalled"),
            ],
            "DEVICE_",
        );
    }
}

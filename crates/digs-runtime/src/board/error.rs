//! Board and component errors.
//!
//! | Error | Code | Recoverable |
//! |-------|------|-------------|
//! | [`BoardError::Worker`] | `BOARD_WORKER` | Yes |
//! | [`BoardError::Channel`] | `BOARD_CHANNEL` | Yes |
//! | [`BoardError::NotConnected`] | `BOARD_NOT_CONNECTED` | Yes |
//! | [`ComponentError::Unbound`] | `COMPONENT_UNBOUND` | No |
//! | [`ComponentError::UnknownMethod`] | `COMPONENT_UNKNOWN_METHOD` | No |
//! | [`ComponentError::Device`] | `COMPONENT_DEVICE` | Yes |
//! | [`ComponentError::Rejected`] | `COMPONENT_REJECTED` | No |
//! | [`ComponentError::InvalidReply`] | `COMPONENT_INVALID_REPLY` | No |
//! | [`ComponentError::BoardOffline`] | `COMPONENT_BOARD_OFFLINE` | Yes |
//! | [`ComponentError::Channel`] | `COMPONENT_CHANNEL` | Yes |

use crate::client::ClientError;
use crate::worker::WorkerError;
use digs_types::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Channel(#[from] ClientError),

    #[error("board '{board}' has no connected worker")]
    NotConnected { board: String },
}

impl ErrorCode for BoardError {
    fn code(&self) -> &'static str {
        match self {
            Self::Worker(_) => "BOARD_WORKER",
            Self::Channel(_) => "BOARD_CHANNEL",
            Self::NotConnected { .. } => "BOARD_NOT_CONNECTED",
        }
    }

    fn is_recoverable(&self) -> bool {
        true
    }
}

#[derive(Debug, Error)]
pub enum ComponentError {
    /// The component was never discovered with `dir`.
    #[error("{class} component is not bound to a device")]
    Unbound { class: String },

    /// The method was not listed by `dir`.
    #[error("component '{id}' has no method '{method}'")]
    UnknownMethod { id: String, method: String },

    /// The device reported an error. The channel is unaffected.
    #[error("component '{id}' failed in '{method}': {message}")]
    Device {
        id: String,
        method: String,
        message: String,
    },

    /// The worker refused to create or describe the component.
    #[error("worker rejected {class} component: {message}")]
    Rejected { class: String, message: String },

    /// The worker answered with an unexpected body.
    #[error("unexpected reply for {class} component: {reason}")]
    InvalidReply { class: String, reason: String },

    #[error("board '{board}' is offline")]
    BoardOffline { board: String },

    #[error(transparent)]
    Channel(#[from] ClientError),
}

impl ErrorCode for ComponentError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unbound { .. } => "COMPONENT_UNBOUND",
            Self::UnknownMethod { .. } => "COMPONENT_UNKNOWN_METHOD",
            Self::Device { .. } => "COMPONENT_DEVICE",
            Self::Rejected { .. } => "COMPONENT_REJECTED",
            Self::InvalidReply { .. } => "COMPONENT_INVALID_REPLY",
            Self::BoardOffline { .. } => "COMPONENT_BOARD_OFFLINE",
            Self::Channel(_) => "COMPONENT_CHANNEL",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Device { .. } | Self::BoardOffline { .. } | Self::Channel(_)
        )
    }
}

impl From<BoardError> for ComponentError {
    fn from(err: BoardError) -> Self {
        match err {
            BoardError::Channel(e) => Self::Channel(e),
            BoardError::NotConnected { board } => Self::BoardOffline { board },
            BoardError::Worker(
                WorkerError::Fork { worker, .. }
                | WorkerError::NotReady { worker, .. }
                | WorkerError::Stopped { worker, .. }
                | WorkerError::NotRunning { worker },
            ) => Self::BoardOffline { board: worker },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digs_types::assert_error_codes;

    #[test]
    fn board_error_codes() {
        assert_error_codes(
            &[
                BoardError::Channel(ClientError::Disconnected),
                BoardError::NotConnected { board: "uno".into() },
                BoardError::Worker(WorkerError::NotRunning {
                    worker: "uno".into(),
                }),
            ],
            "BOARD_",
        );
    }

    #[test]
    fn component_error_codes() {
        assert_error_codes(
            &[
                ComponentError::Unbound { class: "Led".into() },
                ComponentError::UnknownMethod {
                    id: "Led-1".into(),
                    method: "blink".into(),
                },
                ComponentError::Device {
                    id: "Led-1".into(),
                    method: "on".into(),
                    message: "pin busy".into(),
                },
                ComponentError::Rejected {
                    class: "Bogus".into(),
                    message: "Unknown component \"Bogus\"".into(),
                },
                ComponentError::BoardOffline { board: "uno".into() },
                ComponentError::Channel(ClientError::Disconnected),
            ],
            "COMPONENT_",
        );
    }

    #[test]
    fn offline_board_maps_to_component_error() {
        let err = ComponentError::from(BoardError::NotConnected { board: "uno".into() });
        assert!(matches!(err, ComponentError::BoardOffline { board } if board == "uno"));
    }
}

//! Application-level error type.
//!
//! [`AppError`] unifies all internal errors for the application layer.

use digs_runtime::{BoardError, BrokerError, ConfigError};
use digs_types::{CollisionError, ErrorCode};
use thiserror::Error;

/// Unified application error.
///
/// # Example
///
/// ```
/// use digs_app::AppError;
/// use digs_types::{CollisionError, ErrorCode};
///
/// let app_err: AppError = CollisionError { id: "uno".into() }.into();
/// assert_eq!(app_err.code(), "SLUG_COLLISION");
/// ```
#[derive(Debug, Error)]
pub enum AppError {
    /// A board could not be started
    #[error("Board error: {0}")]
    Board(#[from] BoardError),

    /// Two boards claimed the same id
    #[error("Board id error: {0}")]
    Collision(#[from] CollisionError),

    /// Broker could not be bound or reached
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for AppError {
    fn code(&self) -> &'static str {
        match self {
            Self::Board(e) => e.code(),
            Self::Collision(e) => e.code(),
            Self::Broker(e) => e.code(),
            Self::Config(e) => e.code(),
            Self::Io(_) => "APP_IO_ERROR",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Board(e) => e.is_recoverable(),
            Self::Collision(e) => e.is_recoverable(),
            Self::Broker(e) => e.is_recoverable(),
            Self::Config(e) => e.is_recoverable(),
            Self::Io(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_converts() {
        let err: AppError = CollisionError { id: "uno".into() }.into();
        assert!(matches!(err, AppError::Collision(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn error_codes() {
        let err = AppError::Io(std::io::Error::other("disk"));
        assert_eq!(err.code(), "APP_IO_ERROR");
        assert!(err.is_recoverable());

        let err: AppError = ConfigError::missing_env_var("DIGS_ID").into();
        assert!(err.code().starts_with("CONFIG_"));
    }
}

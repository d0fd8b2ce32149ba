//! The error code convention shared by all digs crates.
//!
//! Every error enum in the workspace implements [`ErrorCode`] so that
//! callers (the CLI, the board registry, log lines) can branch on a
//! stable code instead of matching display strings.
//!
//! | Crate | Prefix |
//! |-------|--------|
//! | `digs-types` | `SLUG_` |
//! | `digs-protocol` | `TOPIC_`, `PROTOCOL_` |
//! | `digs-runtime` | `BROKER_`, `CHANNEL_`, `WORKER_`, `BOARD_`, `COMPONENT_`, `CONFIG_` |
//! | `digs-app` | `APP_` |
//!
//! # Example
//!
//! ```
//! use digs_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum LinkError {
//!     Dropped,
//!     BadFrame,
//! }
//!
//! impl ErrorCode for LinkError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::Dropped => "LINK_DROPPED",
//!             Self::BadFrame => "LINK_BAD_FRAME",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Dropped)
//!     }
//! }
//!
//! assert_eq!(LinkError::Dropped.code(), "LINK_DROPPED");
//! assert!(!LinkError::BadFrame.is_recoverable());
//! ```

/// Machine-readable classification of an error.
///
/// # Code Format
///
/// - **UPPER_SNAKE_CASE**, e.g. `"WORKER_NOT_READY"`
/// - **Prefixed** with the owning domain (see the module table)
/// - **Stable**: codes are part of the public contract
///
/// # Recoverability
///
/// An error is recoverable when repeating the operation later may
/// succeed: a dropped broker connection, a timed out request, a worker
/// that can be started again. Malformed input and programming errors
/// are not.
pub trait ErrorCode {
    /// Returns the stable code for this error.
    fn code(&self) -> &'static str;

    /// Returns `true` if retrying may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Asserts that an error code is non-empty, prefixed and UPPER_SNAKE_CASE.
///
/// Intended for tests.
///
/// # Panics
///
/// Panics with a descriptive message if any check fails.
///
/// ```
/// use digs_types::{assert_error_code, ErrorCode};
///
/// struct Gone;
/// impl ErrorCode for Gone {
///     fn code(&self) -> &'static str { "BOARD_GONE" }
///     fn is_recoverable(&self) -> bool { false }
/// }
///
/// assert_error_code(&Gone, "BOARD_");
/// ```
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "Error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "Error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );
    assert!(
        is_upper_snake_case(code),
        "Error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Runs [`assert_error_code`] over every given error.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }

    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

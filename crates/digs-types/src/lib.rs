//! Shared building blocks for the digs crates.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  digs-types     : ErrorCode, SlugAllocator      ◄── HERE    │
//! │  digs-protocol  : Topic, Message, command payloads          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  digs-runtime   : broker, client, worker, board, peon       │
//! │  digs-app       : board registry, application wiring        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  digs-cli       : `digs` binary                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! This crate has no async or I/O dependencies. It holds the
//! [`ErrorCode`] convention every error enum in the workspace follows,
//! and the [`SlugAllocator`] used to hand out unique board ids.
//!
//! # Example
//!
//! ```
//! use digs_types::SlugAllocator;
//!
//! let mut slugs = SlugAllocator::new();
//! assert_eq!(slugs.allocate("Living Room"), "living-room");
//! assert_eq!(slugs.allocate("living room"), "living-room-1");
//! ```

mod error;
mod slug;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use slug::{slugify, CollisionError, SlugAllocator};

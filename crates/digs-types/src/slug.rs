//! Slug generation and uniqueness.
//!
//! Board ids are slugs derived from a configured name. The
//! [`SlugAllocator`] is owned by whoever creates boards (the registry)
//! and passed in explicitly, so tests get a fresh namespace each time.
//!
//! ```text
//! allocate("Kitchen")      -> "kitchen"
//! allocate("kitchen")      -> "kitchen-1"
//! allocate("KITCHEN!")     -> "kitchen-2"
//! claim("kitchen")         -> Err(CollisionError)
//! ```

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::ErrorCode;

/// Fallback slug when a name contains no usable characters.
const EMPTY_SLUG: &str = "board";

/// An identifier was claimed twice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("identifier '{id}' is already taken")]
pub struct CollisionError {
    /// The contested identifier.
    pub id: String,
}

impl ErrorCode for CollisionError {
    fn code(&self) -> &'static str {
        "SLUG_COLLISION"
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Converts a display name into a lowercase, dash-separated slug.
///
/// Runs of characters other than ASCII letters and digits collapse into
/// a single `-`; leading and trailing dashes are dropped.
///
/// ```
/// assert_eq!(digs_types::slugify("Garage Door #2"), "garage-door-2");
/// ```
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        EMPTY_SLUG.to_string()
    } else {
        slug
    }
}

/// Hands out unique slugs, suffixing on collision.
///
/// Append-only: a slug once allocated stays taken for the lifetime of
/// the allocator, even if the board using it is stopped.
#[derive(Debug, Default, Clone)]
pub struct SlugAllocator {
    taken: HashSet<String>,
    counters: HashMap<String, u32>,
}

impl SlugAllocator {
    /// Creates an empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a unique slug for `name`.
    ///
    /// The first request for a base gets the bare slug. Later requests
    /// get `-1`, `-2`, ... with a per-base counter that never goes back.
    pub fn allocate(&mut self, name: &str) -> String {
        let base = slugify(name);
        if self.taken.insert(base.clone()) {
            return base;
        }

        let counter = self.counters.entry(base.clone()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{base}-{counter}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Claims an exact identifier without suffixing.
    ///
    /// # Errors
    ///
    /// Returns [`CollisionError`] if `id` is already taken.
    pub fn claim(&mut self, id: &str) -> Result<(), CollisionError> {
        if self.taken.insert(id.to_string()) {
            Ok(())
        } else {
            Err(CollisionError { id: id.to_string() })
        }
    }

    /// Returns `true` if `id` has been handed out.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.taken.contains(id)
    }

    /// Number of identifiers handed out so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.taken.len()
    }

    /// Returns `true` if nothing has been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }
}

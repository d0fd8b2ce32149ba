//! Topic addressing.
//!
//! # Wire Format
//!
//! ```text
//! {namespace}/{project}/{senderId}/{path}[/{wildcard}][~{requestId}]
//! ```
//!
//! - `wildcard` is `+` (one level) or `#` (everything below). It only
//!   appears on subscription patterns.
//! - `requestId` is `req-<digits>` and only appears on one leg of a
//!   request/response exchange. The responder echoes it unchanged.
//! - A topic is either a pattern or a request, never both.
//!
//! # Lossy Wildcard Decode
//!
//! Decoding a wildcard topic drops the last literal path segment before
//! the wildcard:
//!
//! ```text
//! decode("digs/home/uno/sensors/temp/#")  ->  path = "sensors", wildcard = #
//! encode(..)                              ->  "digs/home/uno/sensors/#"
//! ```
//!
//! Patterns are built locally and never decoded from the wire in normal
//! operation, so this only matters to tooling that parses patterns.

use crate::TopicError;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

const TOPIC_DELIMITER: char = '/';
const REQUEST_DELIMITER: char = '~';

/// Subscription wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wildcard {
    /// `+`: exactly one level.
    Single,
    /// `#`: any number of levels.
    Multi,
}

impl Wildcard {
    /// The character used on the wire.
    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Self::Single => '+',
            Self::Multi => '#',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Single),
            '#' => Some(Self::Multi),
            _ => None,
        }
    }
}

/// Request correlation id, rendered as `req-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Prefix of the wire form.
    pub const PREFIX: &'static str = "req-";

    /// Wraps a sequence number.
    #[must_use]
    pub const fn new(sequence: u64) -> Self {
        Self(sequence)
    }

    /// Returns the sequence number.
    #[must_use]
    pub const fn sequence(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

impl FromStr for RequestId {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(Self::PREFIX)
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
            .map(Self)
            .ok_or_else(|| TopicError::InvalidRequestId {
                value: s.to_string(),
            })
    }
}

/// A structured broker address.
///
/// Immutable; derive a changed copy with [`Topic::update`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    namespace: String,
    project: String,
    sender_id: String,
    path: String,
    wildcard: Option<Wildcard>,
    request_id: Option<RequestId>,
}

impl Topic {
    /// Starts building a topic in the given scope.
    pub fn builder(
        namespace: impl Into<String>,
        project: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> TopicBuilder {
        TopicBuilder {
            namespace: namespace.into(),
            project: project.into(),
            sender_id: sender_id.into(),
            path: String::new(),
            wildcard: None,
            request_id: None,
        }
    }

    /// Returns a builder pre-filled with this topic's fields.
    #[must_use]
    pub fn update(&self) -> TopicBuilder {
        TopicBuilder {
            namespace: self.namespace.clone(),
            project: self.project.clone(),
            sender_id: self.sender_id.clone(),
            path: self.path.clone(),
            wildcard: self.wildcard,
            request_id: self.request_id,
        }
    }

    /// Decodes a wire topic.
    ///
    /// # Errors
    ///
    /// - [`TopicError::Malformed`] if the string does not have at least
    ///   namespace, project and sender followed by a path or wildcard,
    ///   or if a delimiter is misplaced.
    /// - [`TopicError::Ambiguous`] if both a wildcard and a request id
    ///   are present.
    /// - Any field validation error from [`TopicBuilder::build`].
    pub fn decode(raw: &str) -> Result<Self, TopicError> {
        let caps = topic_regex()
            .captures(raw)
            .ok_or_else(|| TopicError::Malformed {
                topic: raw.to_string(),
            })?;

        let wildcard = caps
            .name("wildcard")
            .and_then(|m| m.as_str().chars().next())
            .and_then(Wildcard::from_char);
        let request_id = caps
            .name("request")
            .map(|m| m.as_str().parse::<RequestId>())
            .transpose()?;
        let mut path = caps.name("path").map_or("", |m| m.as_str());

        if wildcard.is_some() && request_id.is_some() {
            return Err(TopicError::Ambiguous {
                topic: raw.to_string(),
            });
        }
        if wildcard.is_none() && path.is_empty() {
            return Err(TopicError::Malformed {
                topic: raw.to_string(),
            });
        }
        if wildcard.is_some() {
            path = path.rsplit_once(TOPIC_DELIMITER).map_or("", |(head, _)| head);
        }

        let mut builder = Topic::builder(&caps["namespace"], &caps["project"], &caps["sender"]);
        builder.path = path.to_string();
        builder.wildcard = wildcard;
        builder.request_id = request_id;
        builder.build()
    }

    /// Encodes this topic to its wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    #[must_use]
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn wildcard(&self) -> Option<Wildcard> {
        self.wildcard
    }

    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    /// Returns `true` if this topic is one leg of a request/response.
    #[must_use]
    pub fn is_request(&self) -> bool {
        self.request_id.is_some()
    }

    /// Local dispatch key derived from the path: `topic:{path}`.
    #[must_use]
    pub fn event_name(&self) -> String {
        format!("topic:{}", self.path)
    }

    /// Local dispatch key for the response leg: `response:{requestId}`.
    ///
    /// `None` unless this is a request topic.
    #[must_use]
    pub fn response_event_name(&self) -> Option<String> {
        self.request_id.map(|id| format!("response:{id}"))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.project, self.sender_id)?;
        if !self.path.is_empty() {
            write!(f, "{TOPIC_DELIMITER}{}", self.path)?;
        }
        if let Some(wildcard) = self.wildcard {
            write!(f, "{TOPIC_DELIMITER}{}", wildcard.as_char())?;
        }
        if let Some(id) = self.request_id {
            write!(f, "{REQUEST_DELIMITER}{id}")?;
        }
        Ok(())
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Builder for [`Topic`].
#[derive(Debug, Clone)]
pub struct TopicBuilder {
    namespace: String,
    project: String,
    sender_id: String,
    path: String,
    wildcard: Option<Wildcard>,
    request_id: Option<RequestId>,
}

impl TopicBuilder {
    #[must_use]
    pub fn sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn wildcard(mut self, wildcard: Wildcard) -> Self {
        self.wildcard = Some(wildcard);
        self
    }

    #[must_use]
    pub fn request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Drops any request id, turning a request leg back into a plain topic.
    #[must_use]
    pub fn clear_request(mut self) -> Self {
        self.request_id = None;
        self
    }

    /// Validates the fields and builds the topic.
    ///
    /// # Errors
    ///
    /// Returns a [`TopicError`] for empty scope fields, reserved
    /// characters, empty path segments, or a missing path on a
    /// non-wildcard topic.
    ///
    /// # Panics
    ///
    /// Panics if both a wildcard and a request id were set. A topic is
    /// either a subscription pattern or a concrete request destination.
    pub fn build(self) -> Result<Topic, TopicError> {
        assert!(
            !(self.wildcard.is_some() && self.request_id.is_some()),
            "a topic cannot carry both a wildcard and a request id"
        );

        check_field("namespace", &self.namespace)?;
        check_field("project", &self.project)?;
        check_field("sender_id", &self.sender_id)?;

        if self.path.is_empty() {
            if self.wildcard.is_none() {
                return Err(TopicError::MissingPath);
            }
        } else {
            for segment in self.path.split(TOPIC_DELIMITER) {
                if segment.is_empty() {
                    return Err(TopicError::EmptySegment {
                        path: self.path.clone(),
                    });
                }
                if has_reserved(segment, false) {
                    return Err(TopicError::ReservedCharacter {
                        field: "path",
                        value: self.path.clone(),
                    });
                }
            }
        }

        Ok(Topic {
            namespace: self.namespace,
            project: self.project,
            sender_id: self.sender_id,
            path: self.path,
            wildcard: self.wildcard,
            request_id: self.request_id,
        })
    }
}

fn check_field(field: &'static str, value: &str) -> Result<(), TopicError> {
    if value.is_empty() {
        return Err(TopicError::EmptyField { field });
    }
    if has_reserved(value, true) {
        return Err(TopicError::ReservedCharacter {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn has_reserved(value: &str, include_delimiter: bool) -> bool {
    value.chars().any(|c| {
        c == REQUEST_DELIMITER
            || c == '+'
            || c == '#'
            || c.is_whitespace()
            || (include_delimiter && c == TOPIC_DELIMITER)
    })
}

fn topic_regex() -> &'static Regex {
    static TOPIC_RE: OnceLock<Regex> = OnceLock::new();
    TOPIC_RE.get_or_init(|| {
        Regex::new(
            r"^(?P<namespace>[^/~+#\s]+)/(?P<project>[^/~+#\s]+)/(?P<sender>[^/~+#\s]+)(?:/(?P<path>[^~+#\s]+?))?(?:/(?P<wildcard>[+#]))?(?:~(?P<request>req-\d+))?$",
        )
        .expect("topic regex is valid")
    })
}

/// Returns `true` if `topic` matches the MQTT-style subscription `filter`.
///
/// `+` matches exactly one level, `#` matches the remaining levels
/// including none (`a/#` matches `a`). A request suffix is part of the
/// last level and needs no special handling.
///
/// ```
/// use digs_protocol::filter_matches;
///
/// assert!(filter_matches("digs/home/uno/#", "digs/home/uno/init~req-1"));
/// assert!(filter_matches("digs/+/uno/online", "digs/home/uno/online"));
/// assert!(!filter_matches("digs/home/uno/+", "digs/home/uno/a/b"));
/// ```
#[must_use]
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split(TOPIC_DELIMITER);
    let mut topic_levels = topic.split(TOPIC_DELIMITER);

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

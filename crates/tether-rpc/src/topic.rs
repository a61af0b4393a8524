//! Topic addresses, patch paths, and subscription identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Logical address of a server-computed state stream.
///
/// A topic is a key, not a stateful object: an ordered sequence of path
/// segments into the server's resource hierarchy plus an ordered list of
/// argument discriminators. Two topics with equal paths but different
/// arguments are distinct subscription identities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    /// Path into the server's resource hierarchy.
    pub path: Vec<String>,
    /// Further discriminators (identifiers, filters).
    pub args: Vec<Value>,
}

impl Topic {
    /// Create a topic with no arguments.
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            args: Vec::new(),
        }
    }

    /// Attach argument discriminators.
    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.join("/"))
    }
}

/// One step of a patch path: a map key or a sequence position.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Position in an ordered sequence.
    Index(usize),
    /// Key in a keyed map.
    Key(String),
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

/// Opaque, client-generated subscription identifier.
///
/// Unique within the connection that issued it and meaningless outside it:
/// after a reconnect every previously issued id is permanently
/// unresolvable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(format!("sub_{}", Uuid::now_v7()))
    }

    /// Wrap an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

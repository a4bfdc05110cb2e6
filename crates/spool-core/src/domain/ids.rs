//! Identifiers carried by an envelope.
//!
//! - [`EnvelopeId`]: internal identity, always unique (ULID). Used by the
//!   scheduler to claim and complete a specific envelope.
//! - [`MessageId`]: caller-visible id. Callers may reuse ids freely; when none
//!   is given one is generated from a fresh ULID.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvelopeId(Ulid);

impl EnvelopeId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_ids_are_unique_and_prefixed() {
        let a = EnvelopeId::generate();
        let b = EnvelopeId::generate();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("env-"));
    }

    #[test]
    fn generated_message_ids_differ() {
        assert_ne!(MessageId::generate(), MessageId::generate());
    }

    #[test]
    fn message_id_serializes_as_plain_string() {
        let id = MessageId::new("order-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"order-7\"");
    }
}

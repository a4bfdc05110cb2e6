//! Lifecycle events emitted by the buffer store.
//!
//! One tagged record covers every kind; consumers match on [`EventKind`].
//!
//! | kind        | emitted when                                          |
//! |-------------|-------------------------------------------------------|
//! | `Started`   | a subject's pending list goes from empty to non-empty |
//! | `Added`     | an envelope is appended (always, after `Started`)     |
//! | `Updated`   | an envelope moves from pending to processed           |
//! | `Completed` | a subject's pending list drains                       |
//!
//! Each event has a process-wide sequence number (`seq`) that increases
//! monotonically, so receivers can restore emission order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessageId, OutcomeKind, Subject};

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Started,
    Added,
    Updated,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferEvent {
    pub subject: Subject,
    pub kind: EventKind,
    /// Pending envelopes for the subject after the change.
    pub pending: usize,
    /// Processed envelopes for the subject after the change.
    pub processed: usize,

    /// `Updated`: the envelope's processing time. `Completed`: the sum over the
    /// drain cycle.
    #[serde(
        rename = "duration_ms",
        default,
        with = "duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Only set on `Updated`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeKind>,

    pub at: DateTime<Utc>,
    pub seq: u64,
}

impl BufferEvent {
    pub fn new(subject: Subject, kind: EventKind, pending: usize, processed: usize) -> Self {
        Self {
            subject,
            kind,
            pending,
            processed,
            duration: None,
            message_id: None,
            name: None,
            text: None,
            outcome: None,
            at: Utc::now(),
            seq: EVENT_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_message(mut self, id: &MessageId, name: Option<&str>) -> Self {
        self.message_id = Some(id.clone());
        self.name = name.map(str::to_owned);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_outcome(mut self, outcome: OutcomeKind) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(d.as_millis() as u64),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

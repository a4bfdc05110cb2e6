//! Envelope - payload とメタデータ
//!
//! An envelope is owned by its subject's pending list until it moves to the
//! processed list. The `running` flag only changes under the subject lock.

use std::time::Duration;

use super::{EnvelopeId, MessageId, Outcome};

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    id: EnvelopeId,
    message_id: MessageId,
    name: Option<String>,
    tag: Option<String>,
    payload: T,
    running: bool,
    processed_in: Option<Duration>,
    outcome: Option<Outcome>,
}

impl<T> Envelope<T> {
    pub fn new(payload: T, message_id: MessageId, name: Option<String>, tag: Option<String>) -> Self {
        Self {
            id: EnvelopeId::generate(),
            message_id,
            name,
            tag,
            payload,
            running: false,
            processed_in: None,
            outcome: None,
        }
    }

    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Processing duration, set once the envelope is processed.
    pub fn processed_in(&self) -> Option<Duration> {
        self.processed_in
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Label used in event text; falls back to the message id.
    pub(crate) fn label(&self) -> &str {
        self.tag
            .as_deref()
            .unwrap_or_else(|| self.message_id.as_str())
    }

    pub(crate) fn mark_running(&mut self) {
        self.running = true;
    }

    pub(crate) fn mark_processed(&mut self, elapsed: Duration, outcome: Outcome) {
        self.running = false;
        self.processed_in = Some(elapsed);
        self.outcome = Some(outcome);
    }
}

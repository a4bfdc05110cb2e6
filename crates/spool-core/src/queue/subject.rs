//! Per-subject queue state.

use std::collections::VecDeque;
use std::time::Duration;

use super::MessageState;
use crate::domain::{Envelope, EnvelopeId, MessageId, Outcome, OutcomeKind};
use crate::observability::QueueCounts;

/// Pending + processed envelopes for one subject.
///
/// Design:
/// - `pending` keeps insertion order; envelopes leave it only through
///   [`SubjectQueue::complete`].
/// - `processed` is append-only until the caller clears it.
/// - `cycle_*` accumulate over one drain cycle (empty -> non-empty -> empty).
pub(crate) struct SubjectQueue<T> {
    pending: VecDeque<Envelope<T>>,
    processed: Vec<Envelope<T>>,
    activations: u64,
    cycle_elapsed: Duration,
    cycle_processed: usize,
}

impl<T> SubjectQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            processed: Vec::new(),
            activations: 0,
            cycle_elapsed: Duration::ZERO,
            cycle_processed: 0,
        }
    }

    /// Append an envelope.
    ///
    /// Returns `Some(first)` when this push started a new drain cycle, where
    /// `first` tells whether it is the subject's very first cycle.
    pub(crate) fn push(&mut self, envelope: Envelope<T>) -> Option<bool> {
        let activated = if self.pending.is_empty() {
            self.activations += 1;
            self.cycle_elapsed = Duration::ZERO;
            self.cycle_processed = 0;
            Some(self.activations == 1)
        } else {
            None
        };
        self.pending.push_back(envelope);
        activated
    }

    /// Move a pending envelope to processed.
    ///
    /// Returns `None` when the envelope is not pending (already completed).
    pub(crate) fn complete(
        &mut self,
        id: EnvelopeId,
        elapsed: Duration,
        outcome: Outcome,
    ) -> Option<&Envelope<T>> {
        let idx = self.pending.iter().position(|e| e.id() == id)?;
        let mut envelope = self.pending.remove(idx)?;
        envelope.mark_processed(elapsed, outcome);
        self.cycle_elapsed += elapsed;
        self.cycle_processed += 1;
        self.processed.push(envelope);
        self.processed.last()
    }

    /// Mark the given envelopes running, skipping any that are no longer
    /// pending-and-idle. Returns the ids actually marked, in queue order.
    pub(crate) fn mark_running(&mut self, ids: &[EnvelopeId]) -> Vec<EnvelopeId> {
        let mut marked = Vec::with_capacity(ids.len());
        for envelope in self.pending.iter_mut() {
            if !envelope.is_running() && ids.contains(&envelope.id()) {
                envelope.mark_running();
                marked.push(envelope.id());
            }
        }
        marked
    }

    pub(crate) fn idle(&self) -> impl Iterator<Item = &Envelope<T>> {
        self.pending.iter().filter(|e| !e.is_running())
    }

    pub(crate) fn pending(&self) -> impl Iterator<Item = &Envelope<T>> {
        self.pending.iter()
    }

    pub(crate) fn processed(&self) -> &[Envelope<T>] {
        &self.processed
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn processed_len(&self) -> usize {
        self.processed.len()
    }

    pub(crate) fn cycle_elapsed(&self) -> Duration {
        self.cycle_elapsed
    }

    pub(crate) fn cycle_processed(&self) -> usize {
        self.cycle_processed
    }

    pub(crate) fn clear_processed(&mut self) {
        self.processed.clear();
    }

    /// State of the oldest pending envelope with this message id, else of the
    /// latest processed one.
    pub(crate) fn state_of(&self, id: &MessageId) -> Option<MessageState> {
        if let Some(envelope) = self.pending.iter().find(|e| e.message_id() == id) {
            return Some(if envelope.is_running() {
                MessageState::Running
            } else {
                MessageState::Pending
            });
        }
        self.processed
            .iter()
            .any(|e| e.message_id() == id)
            .then_some(MessageState::Processed)
    }

    pub(crate) fn counts(&self) -> QueueCounts {
        let running = self.pending.iter().filter(|e| e.is_running()).count();
        let failed = self
            .processed
            .iter()
            .filter(|e| matches!(e.outcome(), Some(o) if o.kind == OutcomeKind::Failure))
            .count();
        QueueCounts {
            waiting: self.pending.len() - running,
            running,
            processed: self.processed.len(),
            failed,
        }
    }
}

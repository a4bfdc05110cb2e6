//! Buffer store: the single source of truth for queue state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use super::subject::SubjectQueue;
use super::{EventSink, MessageState, lock};
use crate::domain::{BufferEvent, Envelope, EnvelopeId, EventKind, MessageId, Outcome, Subject};
use crate::observability::QueueCounts;

/// Thread-safe mapping from subject to pending/processed envelopes.
///
/// Locking:
/// - The outer map lock is held only to look up or insert a subject entry.
/// - Each subject has its own lock, created lazily on first push, so
///   independent subjects never contend.
/// - No lock is held while events are emitted.
pub struct BufferStore<T> {
    subjects: Mutex<HashMap<Subject, Arc<Mutex<SubjectQueue<T>>>>>,
    sink: Arc<dyn EventSink>,
}

impl<T> BufferStore<T> {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            subjects: Mutex::new(HashMap::new()),
            sink,
        }
    }

    fn entry(&self, subject: &Subject) -> Arc<Mutex<SubjectQueue<T>>> {
        let mut subjects = lock(&self.subjects);
        Arc::clone(
            subjects
                .entry(subject.clone())
                .or_insert_with(|| Arc::new(Mutex::new(SubjectQueue::new()))),
        )
    }

    fn existing(&self, subject: &Subject) -> Option<Arc<Mutex<SubjectQueue<T>>>> {
        lock(&self.subjects).get(subject).cloned()
    }

    fn with_existing<R>(
        &self,
        subject: &Subject,
        f: impl FnOnce(&mut SubjectQueue<T>) -> R,
    ) -> Option<R> {
        let queue = self.existing(subject)?;
        let mut q = lock(&queue);
        Some(f(&mut q))
    }

    fn all(&self) -> Vec<(Subject, Arc<Mutex<SubjectQueue<T>>>)> {
        lock(&self.subjects)
            .iter()
            .map(|(s, q)| (s.clone(), Arc::clone(q)))
            .collect()
    }

    fn emit(&self, events: Vec<BufferEvent>) {
        for event in &events {
            debug!(
                subject = %event.subject,
                kind = ?event.kind,
                pending = event.pending,
                processed = event.processed,
                "buffer event"
            );
            self.sink.emit(event);
        }
    }

    /// Append an envelope to the subject's pending list.
    ///
    /// Emits `Started` first when the pending list was empty, then `Added`.
    pub fn add(&self, subject: &Subject, envelope: Envelope<T>) {
        let queue = self.entry(subject);
        let events = {
            let mut q = lock(&queue);
            let id = envelope.message_id().clone();
            let name = envelope.name().map(str::to_owned);
            let label = envelope.label().to_owned();
            let activated = q.push(envelope);

            let (pending, processed) = (q.pending_len(), q.processed_len());
            let mut events = Vec::with_capacity(2);
            if let Some(first) = activated {
                let text = if first {
                    format!("[{subject}] - processing queue initialized")
                } else {
                    format!("[{subject}] - processing queue re-activated for next batch")
                };
                events.push(
                    BufferEvent::new(subject.clone(), EventKind::Started, pending, processed)
                        .with_message(&id, name.as_deref())
                        .with_text(text),
                );
            }
            events.push(
                BufferEvent::new(subject.clone(), EventKind::Added, pending, processed)
                    .with_message(&id, name.as_deref())
                    .with_text(format!("[{label}] received for processing")),
            );
            events
        };
        self.emit(events);
    }

    /// Move an envelope from pending to processed and record how it went.
    ///
    /// Emits `Updated`, then `Completed` when the pending list drains. A call
    /// for a subject with nothing pending is a terminal no-op that still emits
    /// `Completed`, so a late completion after the drain is tolerated.
    pub fn remove(&self, subject: &Subject, id: EnvelopeId, elapsed: Duration, outcome: Outcome) {
        let Some(queue) = self.existing(subject) else {
            self.emit(vec![
                BufferEvent::new(subject.clone(), EventKind::Completed, 0, 0)
                    .with_duration(Duration::ZERO)
                    .with_text(format!("[{subject}] - all [0] items processed")),
            ]);
            return;
        };

        let events = {
            let mut q = lock(&queue);
            let outcome_kind = outcome.kind;
            let mut events = Vec::with_capacity(2);
            let done = q.complete(id, elapsed, outcome).map(|e| {
                (
                    e.message_id().clone(),
                    e.name().map(str::to_owned),
                    e.label().to_owned(),
                )
            });
            match done {
                Some((message_id, name, label)) => {
                    events.push(
                        BufferEvent::new(
                            subject.clone(),
                            EventKind::Updated,
                            q.pending_len(),
                            q.processed_len(),
                        )
                        .with_message(&message_id, name.as_deref())
                        .with_duration(elapsed)
                        .with_outcome(outcome_kind)
                        .with_text(format!("[{label}] processed")),
                    );
                    if q.pending_len() == 0 {
                        events.push(
                            BufferEvent::new(
                                subject.clone(),
                                EventKind::Completed,
                                0,
                                q.processed_len(),
                            )
                            .with_message(&message_id, name.as_deref())
                            .with_duration(q.cycle_elapsed())
                            .with_text(format!(
                                "[{subject}] - processing queue completed, processed [{}] items",
                                q.cycle_processed()
                            )),
                        );
                    }
                }
                None if q.pending_len() == 0 => {
                    events.push(
                        BufferEvent::new(subject.clone(), EventKind::Completed, 0, q.processed_len())
                            .with_duration(q.cycle_elapsed())
                            .with_text(format!(
                                "[{subject}] - all [{}] items processed",
                                q.processed_len()
                            )),
                    );
                }
                None => {
                    warn!(%subject, envelope = %id, "completion for an envelope that is not pending");
                }
            }
            events
        };
        self.emit(events);
    }

    /// Number of pending envelopes (running ones included).
    pub fn pending_len(&self, subject: &Subject) -> usize {
        self.with_existing(subject, |q| q.pending_len())
            .unwrap_or(0)
    }

    /// Mark envelopes running if they are still pending and idle.
    ///
    /// Returns the ids that transitioned, in queue order.
    pub fn mark_running(&self, subject: &Subject, ids: &[EnvelopeId]) -> Vec<EnvelopeId> {
        self.with_existing(subject, |q| q.mark_running(ids))
            .unwrap_or_default()
    }

    pub fn state_of(&self, subject: &Subject, id: &MessageId) -> Option<MessageState> {
        self.with_existing(subject, |q| q.state_of(id)).flatten()
    }

    /// Drop processed history for one subject, or for every subject.
    ///
    /// Pending state is never touched.
    pub fn clear_processed(&self, subject: Option<&Subject>) {
        match subject {
            Some(s) => {
                self.with_existing(s, |q| q.clear_processed());
            }
            None => {
                for (_, q) in self.all() {
                    lock(&q).clear_processed();
                }
            }
        }
    }

    /// True iff no subject has any pending envelope.
    pub fn is_empty(&self) -> bool {
        self.all().iter().all(|(_, q)| lock(q).pending_len() == 0)
    }

    pub fn subjects(&self) -> Vec<Subject> {
        let mut subjects: Vec<Subject> = lock(&self.subjects).keys().cloned().collect();
        subjects.sort();
        subjects
    }

    pub fn counts(&self, subject: &Subject) -> QueueCounts {
        self.with_existing(subject, |q| q.counts())
            .unwrap_or_default()
    }
}

impl<T: Clone> BufferStore<T> {
    /// Point-in-time copy of up to `limit` pending envelopes (0 = all), in order.
    pub fn pending(&self, subject: &Subject, limit: usize) -> Vec<Envelope<T>> {
        let take = if limit == 0 { usize::MAX } else { limit };
        self.with_existing(subject, |q| q.pending().take(take).cloned().collect())
            .unwrap_or_default()
    }

    /// Point-in-time copy of processed envelopes, in completion order.
    pub fn processed(&self, subject: &Subject) -> Vec<Envelope<T>> {
        self.with_existing(subject, |q| q.processed().to_vec())
            .unwrap_or_default()
    }

    /// Up to `limit` pending envelopes that are not running yet, in order.
    pub fn idle(&self, subject: &Subject, limit: usize) -> Vec<Envelope<T>> {
        self.with_existing(subject, |q| q.idle().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OutcomeKind;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<BufferEvent>>,
    }

    impl RecordingSink {
        fn kinds(&self) -> Vec<EventKind> {
            lock(&self.events).iter().map(|e| e.kind).collect()
        }

        fn last(&self) -> BufferEvent {
            lock(&self.events).last().cloned().unwrap()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &BufferEvent) {
            lock(&self.events).push(event.clone());
        }
    }

    fn store() -> (BufferStore<u32>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (BufferStore::new(sink.clone()), sink)
    }

    fn subject(s: &str) -> Subject {
        Subject::parse(s).unwrap()
    }

    fn env(n: u32) -> Envelope<u32> {
        Envelope::new(n, MessageId::new(format!("m{n}")), Some(format!("n{n}")), None)
    }

    fn push(store: &BufferStore<u32>, s: &Subject, n: u32) -> EnvelopeId {
        let e = env(n);
        let id = e.id();
        store.add(s, e);
        id
    }

    #[test]
    fn started_fires_once_per_activation() {
        let (store, sink) = store();
        let s = subject("a");

        push(&store, &s, 1);
        push(&store, &s, 2);
        push(&store, &s, 3);

        assert_eq!(
            sink.kinds(),
            vec![
                EventKind::Started,
                EventKind::Added,
                EventKind::Added,
                EventKind::Added
            ]
        );
        assert_eq!(sink.last().pending, 3);
        assert_eq!(store.pending_len(&s), 3);
    }

    #[test]
    fn drain_emits_updated_then_completed_with_cycle_sum() {
        let (store, sink) = store();
        let s = subject("a");
        let a = push(&store, &s, 1);
        let b = push(&store, &s, 2);

        store.remove(&s, a, Duration::from_millis(10), Outcome::success());
        store.remove(&s, b, Duration::from_millis(30), Outcome::failure("x"));

        let events = lock(&sink.events).clone();
        let tail: Vec<_> = events[3..].iter().map(|e| e.kind).collect();
        assert_eq!(
            tail,
            vec![EventKind::Updated, EventKind::Updated, EventKind::Completed]
        );
        assert_eq!(events[4].outcome, Some(OutcomeKind::Failure));
        let completed = &events[5];
        assert_eq!(completed.pending, 0);
        assert_eq!(completed.processed, 2);
        assert_eq!(completed.duration, Some(Duration::from_millis(40)));
        assert!(store.is_empty());
    }

    #[test]
    fn refill_reports_re_activation() {
        let (store, sink) = store();
        let s = subject("a");
        let a = push(&store, &s, 1);
        store.remove(&s, a, Duration::from_millis(5), Outcome::success());
        push(&store, &s, 2);

        let events = lock(&sink.events).clone();
        let started: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::Started)
            .collect();
        assert_eq!(started.len(), 2);
        assert!(started[1].text.as_deref().unwrap().contains("re-activated"));
    }

    #[test]
    fn remove_for_unknown_subject_still_completes() {
        let (store, sink) = store();
        store.remove(
            &subject("ghost"),
            EnvelopeId::generate(),
            Duration::ZERO,
            Outcome::success(),
        );
        let last = sink.last();
        assert_eq!(last.kind, EventKind::Completed);
        assert_eq!(last.pending, 0);
    }

    #[test]
    fn late_remove_after_drain_completes_again() {
        let (store, sink) = store();
        let s = subject("a");
        let a = push(&store, &s, 1);
        store.remove(&s, a, Duration::from_millis(5), Outcome::success());
        store.remove(&s, a, Duration::from_millis(5), Outcome::success());

        let completed = lock(&sink.events)
            .iter()
            .filter(|e| e.kind == EventKind::Completed)
            .count();
        assert_eq!(completed, 2);
        assert_eq!(store.processed(&s).len(), 1);
    }

    #[test]
    fn stale_remove_while_pending_is_ignored() {
        let (store, sink) = store();
        let s = subject("a");
        let a = push(&store, &s, 1);
        push(&store, &s, 2);
        store.remove(&s, a, Duration::ZERO, Outcome::success());
        let before = lock(&sink.events).len();

        store.remove(&s, a, Duration::ZERO, Outcome::success());
        assert_eq!(lock(&sink.events).len(), before);
        assert_eq!(store.pending_len(&s), 1);
    }

    #[test]
    fn snapshots_are_copies_and_respect_limit() {
        let (store, _) = store();
        let s = subject("a");
        for n in 1..=4 {
            push(&store, &s, n);
        }

        let two: Vec<u32> = store.pending(&s, 2).into_iter().map(|e| *e.payload()).collect();
        assert_eq!(two, vec![1, 2]);
        assert_eq!(store.pending(&s, 0).len(), 4);

        let snapshot = store.pending(&s, 0);
        push(&store, &s, 5);
        assert_eq!(snapshot.len(), 4);
        assert!(store.pending(&subject("none"), 0).is_empty());
    }

    #[test]
    fn idle_skips_running_envelopes() {
        let (store, _) = store();
        let s = subject("a");
        let a = push(&store, &s, 1);
        push(&store, &s, 2);
        push(&store, &s, 3);

        assert_eq!(store.mark_running(&s, &[a]), vec![a]);
        let idle: Vec<u32> = store.idle(&s, 5).into_iter().map(|e| *e.payload()).collect();
        assert_eq!(idle, vec![2, 3]);
        assert_eq!(
            store.state_of(&s, &MessageId::new("m1")),
            Some(MessageState::Running)
        );
        assert_eq!(store.state_of(&subject("none"), &MessageId::new("m1")), None);
    }

    #[test]
    fn clear_processed_leaves_pending_and_other_subjects() {
        let (store, _) = store();
        let (a, b) = (subject("a"), subject("b"));
        let a1 = push(&store, &a, 1);
        push(&store, &a, 2);
        let b1 = push(&store, &b, 3);
        store.remove(&a, a1, Duration::ZERO, Outcome::success());
        store.remove(&b, b1, Duration::ZERO, Outcome::success());

        store.clear_processed(Some(&a));
        assert!(store.processed(&a).is_empty());
        assert_eq!(store.pending_len(&a), 1);
        assert_eq!(store.processed(&b).len(), 1);

        store.clear_processed(None);
        assert!(store.processed(&b).is_empty());
        assert_eq!(store.subjects(), vec![a, b]);
    }

    #[test]
    fn sink_may_read_the_store_while_handling_events() {
        struct Reentrant {
            store: Mutex<Option<Arc<BufferStore<u32>>>>,
            seen: Mutex<Vec<usize>>,
        }
        impl EventSink for Reentrant {
            fn emit(&self, event: &BufferEvent) {
                if let Some(store) = lock(&self.store).as_ref() {
                    lock(&self.seen).push(store.pending_len(&event.subject));
                }
            }
        }

        let sink = Arc::new(Reentrant {
            store: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        });
        let store = Arc::new(BufferStore::new(sink.clone()));
        *lock(&sink.store) = Some(Arc::clone(&store));

        push(&store, &subject("a"), 1);
        assert_eq!(*lock(&sink.seen), vec![1, 1]);

        // break the Arc cycle
        lock(&sink.store).take();
    }
}

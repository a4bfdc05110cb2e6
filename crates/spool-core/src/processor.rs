//! Processor - 購読キーごとのバッファリングと並列数制限付き非同期処理
//!
//! # 構成
//! - [`BufferStore`] が pending / processed の唯一の状態を持つ
//! - [`LoopRegistry`] が subject ごとの poll loop を起動・破棄する
//! - poll loop の tick が空きスロット分だけ envelope を選んで dispatch する
//!
//! Wiring: the store's sink is routed to the loop registry (`Started` and
//! `Completed`) and then to the [`EventBus`], so lifecycle bookkeeping always
//! happens before subscribers see the event.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::builder::ProcessorBuilder;
use crate::config::ProcessorConfig;
use crate::domain::{BufferEvent, Envelope, EnvelopeId, EventKind, MessageId, Outcome, Subject};
use crate::error::SpoolError;
use crate::lifecycle::LoopRegistry;
use crate::observability::{EventBus, QueueCounts};
use crate::queue::{BufferStore, EventSink, MessageState};
use crate::runtime::{AdmissionPredicate, HandlerSlot, MessageHandler};
use crate::worker::{SlotPermit, Slots, dispatch_one};

/// Optional identity fields attached to a pushed payload.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub id: Option<MessageId>,
    pub name: Option<String>,
    pub tag: Option<String>,
}

impl PushOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

pub(crate) struct Shared<T: Send + 'static> {
    store: BufferStore<T>,
    loops: LoopRegistry,
    slots: Arc<Slots>,
    handlers: HandlerSlot<T>,
    bus: EventBus,
    config: ProcessorConfig,
    runtime: Handle,
}

/// Routes store events into the loop registry, then onto the bus.
struct ProcessorSink<T: Send + 'static> {
    shared: Weak<Shared<T>>,
}

impl<T: Clone + Send + 'static> EventSink for ProcessorSink<T> {
    fn emit(&self, event: &BufferEvent) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        match event.kind {
            EventKind::Started => {
                shared.loops.on_started(
                    &event.subject,
                    || shared.store.pending_len(&event.subject),
                    |token| Shared::spawn_loop(&shared, event.subject.clone(), token),
                );
            }
            EventKind::Completed => {
                shared
                    .loops
                    .on_completed(&event.subject, || shared.store.pending_len(&event.subject));
            }
            EventKind::Added | EventKind::Updated => {}
        }
        shared.bus.publish(event.clone());
    }
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn spawn_loop(
        this: &Arc<Self>,
        subject: Subject,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let period = this.config.poll_interval();
        this.runtime
            .spawn(poll_loop(Arc::downgrade(this), subject, token, period))
    }

    /// One scheduling pass for `subject`. Never waits on a handler.
    fn tick(self: &Arc<Self>, subject: &Subject) {
        let available = self.slots.available();
        if available == 0 {
            trace!(%subject, cap = self.slots.cap(), "concurrency cap saturated, skipping tick");
            return;
        }
        let Some(handler) = self.handlers.handler() else {
            return;
        };

        let candidates = self.store.idle(subject, available);
        if candidates.is_empty() {
            return;
        }
        let mut admitted: Vec<Envelope<T>> = match self.handlers.admission() {
            Some(gate) => candidates
                .into_iter()
                .filter(|e| gate.admit(e.payload()))
                .collect(),
            None => candidates,
        };
        if admitted.is_empty() {
            return;
        }

        let mut permits = self.slots.try_acquire(admitted.len());
        admitted.truncate(permits.len());
        if admitted.is_empty() {
            return;
        }

        let ids: Vec<EnvelopeId> = admitted.iter().map(Envelope::id).collect();
        let marked = self.store.mark_running(subject, &ids);
        for envelope in admitted.into_iter().filter(|e| marked.contains(&e.id())) {
            let Some(permit) = permits.pop() else {
                break;
            };
            self.dispatch(subject.clone(), envelope, Arc::clone(&handler), permit);
        }
        // unused reservations go back here
        drop(permits);
    }

    fn dispatch(
        self: &Arc<Self>,
        subject: Subject,
        envelope: Envelope<T>,
        handler: Arc<dyn MessageHandler<T>>,
        permit: SlotPermit,
    ) {
        let shared = Arc::clone(self);
        let timeout = self.config.dispatch_timeout();
        let id = envelope.id();
        debug!(%subject, envelope = %id, "dispatching");

        self.runtime.spawn(async move {
            let started = Instant::now();
            let result = dispatch_one(handler, envelope.into_payload(), permit, timeout).await;
            let elapsed = started.elapsed();

            if let Err(err) = &result {
                warn!(
                    %subject,
                    envelope = %id,
                    error = %err,
                    label = err.as_label(),
                    "dispatch failed"
                );
            }
            shared.store.remove(&subject, id, elapsed, Outcome::from(result));
        });
    }
}

async fn poll_loop<T: Clone + Send + 'static>(
    weak: Weak<Shared<T>>,
    subject: Subject,
    token: CancellationToken,
    period: Duration,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(%subject, ?period, "poll loop started");

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }
        if token.is_cancelled() {
            break;
        }
        let Some(shared) = weak.upgrade() else {
            break;
        };
        shared.tick(&subject);
    }

    debug!(%subject, "poll loop stopped");
}

/// Per-subject buffering engine with a global concurrency cap.
///
/// Payloads pushed for a subject are offered to the registered handler in
/// insertion order, a tick at a time, while the number of running dispatches
/// across every subject stays at or below the configured cap. Completion order
/// is not FIFO.
///
/// A handler that never returns holds its slot forever; configure
/// `dispatch_timeout_ms` if that can happen. For blocking handlers the timeout
/// only records the outcome early: the slot is held until the closure returns.
///
/// Dropping the processor shuts every poll loop down. In-flight dispatches
/// still finish and are recorded.
///
/// # 使用例
/// ```ignore
/// let processor = Processor::<u32>::builder()
///     .poll_interval_ms(100)
///     .concurrency(2)
///     .handler(handler_fn(|n: u32| async move { Ok(()) }))
///     .build()?;
/// processor.push("batch-1", 42)?;
/// ```
pub struct Processor<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> Processor<T> {
    /// Build a processor on the current Tokio runtime.
    pub fn new(config: ProcessorConfig) -> Result<Self, SpoolError> {
        let runtime = Handle::try_current().map_err(|_| SpoolError::NoRuntime)?;
        Ok(Self::with_runtime(config, runtime))
    }

    pub fn with_runtime(config: ProcessorConfig, runtime: Handle) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<T>>| {
            let sink: Arc<dyn EventSink> = Arc::new(ProcessorSink {
                shared: weak.clone(),
            });
            Shared {
                store: BufferStore::new(sink),
                loops: LoopRegistry::new(),
                slots: Slots::new(config.concurrency_cap()),
                handlers: HandlerSlot::new(),
                bus: EventBus::new(config.event_capacity()),
                config,
                runtime,
            }
        });
        Self { shared }
    }

    pub fn builder() -> ProcessorBuilder<T> {
        ProcessorBuilder::new()
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.shared.config
    }

    /// Register the processing function. Replaces any previous one.
    pub fn register_handler<H: MessageHandler<T> + 'static>(&self, handler: H) {
        self.register_handler_arc(Arc::new(handler));
    }

    pub fn register_handler_arc(&self, handler: Arc<dyn MessageHandler<T>>) {
        self.shared.handlers.set_handler(handler);
    }

    /// Register the admission predicate. Replaces any previous one.
    pub fn register_admission<P: AdmissionPredicate<T> + 'static>(&self, predicate: P) {
        self.register_admission_arc(Arc::new(predicate));
    }

    pub fn register_admission_arc(&self, predicate: Arc<dyn AdmissionPredicate<T>>) {
        self.shared.handlers.set_admission(Some(predicate));
    }

    /// Back to admitting everything.
    pub fn clear_admission(&self) {
        self.shared.handlers.set_admission(None);
    }

    /// Enqueue a payload with a generated message id.
    pub fn push(&self, subject: &str, payload: T) -> Result<MessageId, SpoolError> {
        self.push_with(subject, payload, PushOptions::default())
    }

    /// Enqueue a payload.
    ///
    /// Fails without enqueueing anything when the subject is blank, when no
    /// handler is registered, or after shutdown.
    pub fn push_with(
        &self,
        subject: &str,
        payload: T,
        options: PushOptions,
    ) -> Result<MessageId, SpoolError> {
        let subject = Subject::parse(subject)?;
        if !self.shared.handlers.has_handler() {
            return Err(SpoolError::HandlerNotRegistered);
        }
        if self.shared.loops.is_shut_down() {
            return Err(SpoolError::ShutDown);
        }

        let message_id = options.id.unwrap_or_else(MessageId::generate);
        let envelope = Envelope::new(payload, message_id.clone(), options.name, options.tag);
        self.shared.store.add(&subject, envelope);
        Ok(message_id)
    }

    /// Pending payloads for `subject`, in insertion order. Running ones included.
    pub fn get_pending(&self, subject: &str) -> Vec<T> {
        self.pending_envelopes(subject)
            .into_iter()
            .map(Envelope::into_payload)
            .collect()
    }

    /// Processed payloads for `subject`, in completion order.
    pub fn get_processed(&self, subject: &str) -> Vec<T> {
        self.processed_envelopes(subject)
            .into_iter()
            .map(Envelope::into_payload)
            .collect()
    }

    pub fn pending_envelopes(&self, subject: &str) -> Vec<Envelope<T>> {
        match Subject::parse(subject) {
            Ok(s) => self.shared.store.pending(&s, 0),
            Err(_) => Vec::new(),
        }
    }

    pub fn processed_envelopes(&self, subject: &str) -> Vec<Envelope<T>> {
        match Subject::parse(subject) {
            Ok(s) => self.shared.store.processed(&s),
            Err(_) => Vec::new(),
        }
    }

    /// Drop processed history for one subject, or for all when `None`.
    pub fn clear_processed(&self, subject: Option<&str>) {
        match subject {
            Some(raw) => {
                if let Ok(s) = Subject::parse(raw) {
                    self.shared.store.clear_processed(Some(&s));
                }
            }
            None => self.shared.store.clear_processed(None),
        }
    }

    /// Live event feed. Only events sent after subscribing are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<BufferEvent> {
        self.shared.bus.subscribe()
    }

    pub fn counts(&self, subject: &str) -> QueueCounts {
        match Subject::parse(subject) {
            Ok(s) => self.shared.store.counts(&s),
            Err(_) => QueueCounts::default(),
        }
    }

    /// Where the message with this id is: pending, running or processed.
    ///
    /// With reused ids the oldest pending match wins over processed history.
    pub fn state_of(&self, subject: &str, id: &MessageId) -> Option<MessageState> {
        let subject = Subject::parse(subject).ok()?;
        self.shared.store.state_of(&subject, id)
    }

    /// Dispatches currently holding a slot, across all subjects.
    pub fn running_count(&self) -> usize {
        self.shared.slots.running()
    }

    pub fn concurrency_cap(&self) -> usize {
        self.shared.slots.cap()
    }

    pub fn subjects(&self) -> Vec<Subject> {
        self.shared.store.subjects()
    }

    /// True when no subject has anything pending.
    pub fn is_idle(&self) -> bool {
        self.shared.store.is_empty()
    }

    pub fn has_active_loop(&self, subject: &str) -> bool {
        Subject::parse(subject).is_ok_and(|s| self.shared.loops.is_active(&s))
    }

    pub fn active_loops(&self) -> usize {
        self.shared.loops.active_count()
    }

    /// Stop every poll loop. Pushes fail with [`SpoolError::ShutDown`] from now on.
    pub fn shutdown(&self) {
        if !self.shared.loops.is_shut_down() {
            debug!("processor shutting down");
        }
        self.shared.loops.shutdown();
    }
}

impl<T: Clone + Send + 'static> Drop for Processor<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

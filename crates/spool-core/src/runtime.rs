use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::ProcessError;
use crate::worker::{SlotPermit, panic_message};

/// The processing function applied to every payload.
///
/// Handlers run on Tokio worker tasks, never on a poll loop. A handler that
/// blocks the thread should be wrapped with [`blocking_handler_fn`] instead.
#[async_trait]
pub trait MessageHandler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, message: T) -> Result<(), ProcessError>;

    /// Run `handle` while holding a concurrency slot.
    ///
    /// The slot must stay held for as long as the work actually runs. The
    /// default holds it inside this future, so dropping the future (on
    /// timeout) stops the work and frees the slot together. Handlers whose
    /// work outlives the future must move `slot` into that work.
    async fn handle_with_slot(&self, message: T, slot: SlotPermit) -> Result<(), ProcessError> {
        let result = self.handle(message).await;
        drop(slot);
        result
    }
}

/// Gate deciding whether an otherwise eligible payload may start now.
///
/// Rejected payloads stay pending, untouched, and are offered again on a later
/// tick. Called outside every store lock; keep it cheap.
pub trait AdmissionPredicate<T>: Send + Sync {
    fn admit(&self, message: &T) -> bool;
}

/// Async closure adapter.
pub struct FnHandler<F>(F);

pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler(f)
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for FnHandler<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ProcessError>> + Send,
{
    async fn handle(&self, message: T) -> Result<(), ProcessError> {
        (self.0)(message).await
    }
}

/// Synchronous closure adapter; each call runs on Tokio's blocking pool.
///
/// A blocking call cannot be interrupted. When a dispatch timeout fires, the
/// timed-out outcome is recorded right away but the slot stays taken until
/// the closure returns.
pub struct BlockingFnHandler<F>(Arc<F>);

pub fn blocking_handler_fn<F>(f: F) -> BlockingFnHandler<F> {
    BlockingFnHandler(Arc::new(f))
}

#[async_trait]
impl<T, F> MessageHandler<T> for BlockingFnHandler<F>
where
    T: Send + 'static,
    F: Fn(T) -> Result<(), ProcessError> + Send + Sync + 'static,
{
    async fn handle(&self, message: T) -> Result<(), ProcessError> {
        let f = Arc::clone(&self.0);
        join_blocking(tokio::task::spawn_blocking(move || f(message))).await
    }

    async fn handle_with_slot(&self, message: T, slot: SlotPermit) -> Result<(), ProcessError> {
        let f = Arc::clone(&self.0);
        join_blocking(tokio::task::spawn_blocking(move || {
            // released when the closure returns or unwinds
            let _slot = slot;
            f(message)
        }))
        .await
    }
}

async fn join_blocking(
    join: tokio::task::JoinHandle<Result<(), ProcessError>>,
) -> Result<(), ProcessError> {
    match join.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(ProcessError::Panicked(panic_message(
            err.into_panic().as_ref(),
        ))),
        Err(err) => Err(ProcessError::failed(err.to_string())),
    }
}

pub struct FnPredicate<F>(F);

pub fn predicate_fn<F>(f: F) -> FnPredicate<F> {
    FnPredicate(f)
}

impl<T, F> AdmissionPredicate<T> for FnPredicate<F>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn admit(&self, message: &T) -> bool {
        (self.0)(message)
    }
}

/// Registered processing function and admission predicate.
///
/// Both may be (re)registered at any time; the latest registration wins and
/// applies from the next tick on.
pub struct HandlerSlot<T: Send + 'static> {
    handler: RwLock<Option<Arc<dyn MessageHandler<T>>>>,
    admission: RwLock<Option<Arc<dyn AdmissionPredicate<T>>>>,
}

impl<T: Send + 'static> HandlerSlot<T> {
    pub fn new() -> Self {
        Self {
            handler: RwLock::new(None),
            admission: RwLock::new(None),
        }
    }

    pub fn set_handler(&self, handler: Arc<dyn MessageHandler<T>>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn handler(&self) -> Option<Arc<dyn MessageHandler<T>>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_handler(&self) -> bool {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn set_admission(&self, predicate: Option<Arc<dyn AdmissionPredicate<T>>>) {
        *self.admission.write().unwrap_or_else(PoisonError::into_inner) = predicate;
    }

    pub fn admission(&self) -> Option<Arc<dyn AdmissionPredicate<T>>> {
        self.admission
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T: Send + 'static> Default for HandlerSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting(AtomicU32);

    #[async_trait]
    impl MessageHandler<u32> for Counting {
        async fn handle(&self, message: u32) -> Result<(), ProcessError> {
            self.0.fetch_add(message, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn trait_handlers_run() {
        let h = Counting(AtomicU32::new(0));
        h.handle(3).await.unwrap();
        h.handle(4).await.unwrap();
        assert_eq!(h.0.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn async_closures_adapt() {
        let h = handler_fn(|n: u32| async move {
            if n == 0 {
                Err(ProcessError::failed("zero"))
            } else {
                Ok(())
            }
        });
        assert!(h.handle(1).await.is_ok());
        assert_eq!(h.handle(0).await, Err(ProcessError::failed("zero")));
    }

    #[tokio::test]
    async fn blocking_closures_run_off_the_runtime_and_catch_panics() {
        let ok = blocking_handler_fn(|_: u32| -> Result<(), ProcessError> {
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok(())
        });
        assert!(ok.handle(1).await.is_ok());

        let boom = blocking_handler_fn(|_: u32| -> Result<(), ProcessError> { panic!("kaboom") });
        match boom.handle(1).await {
            Err(ProcessError::Panicked(msg)) => assert!(msg.contains("kaboom")),
            other => panic!("expected panic capture, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blocking_work_keeps_its_slot_after_the_future_is_dropped() {
        let slots = crate::worker::Slots::new(1);
        let h = blocking_handler_fn(|_: u32| -> Result<(), ProcessError> {
            std::thread::sleep(std::time::Duration::from_millis(100));
            Ok(())
        });
        let slot = slots.try_acquire(1).pop().unwrap();

        let cut = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            h.handle_with_slot(1, slot),
        )
        .await;
        assert!(cut.is_err());
        assert_eq!(slots.running(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        assert_eq!(slots.running(), 0);
    }

    #[tokio::test]
    async fn async_work_frees_its_slot_when_cut_short() {
        let slots = crate::worker::Slots::new(1);
        let h = handler_fn(|_: u32| async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok::<(), ProcessError>(())
        });
        let slot = slots.try_acquire(1).pop().unwrap();

        let cut = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            h.handle_with_slot(1, slot),
        )
        .await;
        assert!(cut.is_err());
        assert_eq!(slots.running(), 0);
    }

    #[test]
    fn slot_replaces_registrations() {
        let slot: HandlerSlot<u32> = HandlerSlot::new();
        assert!(!slot.has_handler());
        assert!(slot.admission().is_none());

        slot.set_handler(Arc::new(Counting(AtomicU32::new(0))));
        assert!(slot.has_handler());

        slot.set_admission(Some(Arc::new(predicate_fn(|n: &u32| *n > 1))));
        let gate = slot.admission().unwrap();
        assert!(!gate.admit(&1));
        assert!(gate.admit(&2));

        slot.set_admission(None);
        assert!(slot.admission().is_none());
    }
}

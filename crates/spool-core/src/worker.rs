use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;

use crate::error::ProcessError;
use crate::runtime::MessageHandler;

/// Global running-dispatch counter bounded by the concurrency cap.
///
/// Slots are reserved with a compare-and-swap loop, so concurrent ticks of
/// different subjects can never take more than `cap` in total. Each reserved
/// slot is held by a [`SlotPermit`] and returned when the permit drops.
#[derive(Debug)]
pub struct Slots {
    cap: usize,
    running: AtomicUsize,
}

impl Slots {
    pub fn new(cap: usize) -> Arc<Self> {
        Arc::new(Self {
            cap,
            running: AtomicUsize::new(0),
        })
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.cap.saturating_sub(self.running())
    }

    /// Reserve up to `want` slots. May return fewer (or none) when the cap is
    /// close to saturation.
    pub fn try_acquire(self: &Arc<Self>, want: usize) -> Vec<SlotPermit> {
        let mut current = self.running.load(Ordering::Acquire);
        let taken = loop {
            let take = want.min(self.cap.saturating_sub(current));
            if take == 0 {
                return Vec::new();
            }
            match self.running.compare_exchange_weak(
                current,
                current + take,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break take,
                Err(actual) => current = actual,
            }
        };
        (0..taken)
            .map(|_| SlotPermit {
                slots: Arc::clone(self),
            })
            .collect()
    }
}

/// One reserved slot. Dropping it decrements the running counter.
#[derive(Debug)]
pub struct SlotPermit {
    slots: Arc<Slots>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.slots.running.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Run the handler once, turning every way it can go wrong into a
/// `ProcessError`: returned errors, panics, and (when configured) timeouts.
///
/// `slot` is handed to the handler, which keeps it until its work really
/// ends. A timeout reports `TimedOut` without waiting for that.
pub async fn dispatch_one<T: Send + 'static>(
    handler: Arc<dyn MessageHandler<T>>,
    message: T,
    slot: SlotPermit,
    timeout: Option<Duration>,
) -> Result<(), ProcessError> {
    let run = AssertUnwindSafe(handler.handle_with_slot(message, slot)).catch_unwind();
    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(caught) => caught,
            Err(_elapsed) => return Err(ProcessError::TimedOut(limit)),
        },
        None => run.await,
    };
    match caught {
        Ok(result) => result,
        Err(panic) => Err(ProcessError::Panicked(panic_message(panic.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

//! Lifecycle manager: at most one live poll loop per subject.
//!
//! ```text
//! Started   ──► NoLoop ──(pending > 0)──spawn──► Active(handle)
//!                         Active(finished/cancelled) ──respawn──► Active(handle)
//! Completed ──► Active ──(pending == 0)──cancel──► NoLoop
//!                      └─(pending > 0)──────────► Active (kept)
//! ```
//!
//! ## Rules
//! - All transitions happen under one registry lock.
//! - Both transitions re-read the subject's pending count under that lock: a
//!   push racing with a drain is never left without a loop, and a `Started`
//!   arriving after its batch already drained does not spawn one.
//! - Lock order is registry -> subject queue, never the reverse.
//! - Repeated `Started`/`Completed` signals are idempotent.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::Subject;
use crate::queue::lock;

/// A running poll loop.
#[derive(Debug)]
pub struct LoopHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl LoopHandle {
    pub fn new(token: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { token, join }
    }

    /// A handle whose loop was cancelled or has exited is no longer live.
    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled() && !self.join.is_finished()
    }

    fn cancel(&self) {
        self.token.cancel();
    }
}

#[derive(Debug)]
pub enum LoopState {
    NoLoop,
    Active(LoopHandle),
}

impl LoopState {
    pub fn is_live(&self) -> bool {
        matches!(self, LoopState::Active(h) if h.is_live())
    }
}

#[derive(Debug)]
pub struct LoopRegistry {
    loops: Mutex<HashMap<Subject, LoopState>>,
    root: CancellationToken,
}

impl LoopRegistry {
    pub fn new() -> Self {
        Self {
            loops: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Handle a first-arrival signal.
    ///
    /// `spawn` receives a fresh child token and must start the loop. It is only
    /// called when the subject has no live loop and `pending` reports work.
    /// Returns whether a loop was started.
    pub fn on_started<P, F>(&self, subject: &Subject, pending: P, spawn: F) -> bool
    where
        P: FnOnce() -> usize,
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        if self.root.is_cancelled() {
            return false;
        }
        let mut loops = lock(&self.loops);
        let state = loops.entry(subject.clone()).or_insert(LoopState::NoLoop);
        if state.is_live() {
            return false;
        }
        if pending() == 0 {
            debug!(%subject, "batch drained before activation, no poll loop needed");
            return false;
        }
        let token = self.root.child_token();
        let join = spawn(token.clone());
        *state = LoopState::Active(LoopHandle::new(token, join));
        debug!(%subject, "poll loop activated");
        true
    }

    /// Handle a drain signal.
    ///
    /// `pending` is re-evaluated under the registry lock; the loop is kept when
    /// it reports anything still pending. Returns whether a loop was torn down.
    pub fn on_completed<P>(&self, subject: &Subject, pending: P) -> bool
    where
        P: FnOnce() -> usize,
    {
        let mut loops = lock(&self.loops);
        let Some(state) = loops.get_mut(subject) else {
            return false;
        };
        let LoopState::Active(handle) = state else {
            return false;
        };
        if handle.is_live() && pending() > 0 {
            debug!(%subject, "drain raced with a new arrival, keeping poll loop");
            return false;
        }
        handle.cancel();
        *state = LoopState::NoLoop;
        debug!(%subject, "poll loop disposed");
        true
    }

    pub fn is_active(&self, subject: &Subject) -> bool {
        lock(&self.loops)
            .get(subject)
            .is_some_and(LoopState::is_live)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.loops).values().filter(|s| s.is_live()).count()
    }

    /// Cancel every loop; later `Started` signals are ignored.
    pub fn shutdown(&self) {
        self.root.cancel();
        let mut loops = lock(&self.loops);
        for state in loops.values_mut() {
            *state = LoopState::NoLoop;
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for LoopRegistry {
    fn default() -> Self {
        Self::new()
    }
}

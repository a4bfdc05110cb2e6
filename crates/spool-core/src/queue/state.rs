//! Message state machine.

use serde::{Deserialize, Serialize};

/// Where an envelope is in its life.
///
/// State transitions:
/// - Pending -> Running -> Processed
/// - Pending -> Pending (offered, rejected by the admission predicate, re-offered)
///
/// An envelope is in exactly one state at any instant. Failed dispatches still
/// end in `Processed`; the envelope's outcome records the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    /// Queued, not yet handed to a worker.
    Pending,

    /// Handed to a worker; still counted in the pending list.
    Running,

    /// Moved to the processed history.
    Processed,
}


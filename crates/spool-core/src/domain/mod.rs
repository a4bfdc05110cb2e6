//! Domain model (ids, subjects, envelopes, outcomes, events).

pub mod envelope;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod subject;

pub use envelope::Envelope;
pub use events::{BufferEvent, EventKind};
pub use ids::{EnvelopeId, MessageId};
pub use outcome::{Outcome, OutcomeKind};
pub use subject::Subject;

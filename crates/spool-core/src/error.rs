use std::time::Duration;

use thiserror::Error;

/// Errors raised synchronously by the processor API.
///
/// These are configuration problems. They surface at the call site and the
/// offending message is never enqueued.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("subject is required: batch / package / aggregate name or id is missing")]
    BlankSubject,

    #[error("processing handler not registered, unable to process message")]
    HandlerNotRegistered,

    #[error("no tokio runtime available to drive poll loops")]
    NoRuntime,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("processor has been shut down")]
    ShutDown,
}

/// Failure of a single dispatch.
///
/// Handlers return `Failed`; `Panicked` and `TimedOut` are produced by the
/// dispatch boundary itself.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("processing failed: {0}")]
    Failed(String),

    #[error("processing panicked: {0}")]
    Panicked(String),

    #[error("processing timed out after {0:?}")]
    TimedOut(Duration),
}

impl ProcessError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Short stable label (snake_case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProcessError::Failed(_) => "process_failed",
            ProcessError::Panicked(_) => "process_panicked",
            ProcessError::TimedOut(_) => "process_timed_out",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(ProcessError::failed("x").as_label(), "process_failed");
        assert_eq!(
            ProcessError::Panicked("boom".into()).as_label(),
            "process_panicked"
        );
        assert_eq!(
            ProcessError::TimedOut(Duration::from_millis(5)).as_label(),
            "process_timed_out"
        );
    }

    #[test]
    fn config_errors_render_a_reason() {
        let msg = SpoolError::HandlerNotRegistered.to_string();
        assert!(msg.contains("handler"));

        let msg = SpoolError::InvalidConfig("bad".into()).to_string();
        assert!(msg.ends_with("bad"));
    }
}

//! Outcome model: how a dispatch ended.
//!
//! A failed dispatch still moves its envelope to the processed history; the
//! outcome is what tells the two apart afterwards.

use serde::{Deserialize, Serialize};

use crate::error::ProcessError;

/// We serialize as SCREAMING_SNAKE_CASE: SUCCESS / FAILURE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}

impl From<Result<(), ProcessError>> for Outcome {
    fn from(result: Result<(), ProcessError>) -> Self {
        match result {
            Ok(()) => Outcome::success(),
            Err(err) => Outcome::failure(err.to_string()),
        }
    }
}

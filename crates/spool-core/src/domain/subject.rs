//! Subject - 論理パーティションキー
//!
//! A subject groups related messages for independent queueing and polling.
//! Blank subjects are rejected at the boundary, so every `Subject` value in the
//! engine is a usable key.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SpoolError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    /// Validate and wrap a subject name.
    ///
    /// Surrounding whitespace is kept as given; only an empty or all-whitespace
    /// name is an error.
    pub fn parse(s: impl Into<String>) -> Result<Self, SpoolError> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(SpoolError::BlankSubject);
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("")]
    #[case(" ")]
    #[case("\t\n")]
    fn blank_subjects_are_rejected(#[case] raw: &str) {
        assert!(matches!(Subject::parse(raw), Err(SpoolError::BlankSubject)));
    }

    #[rstest]
    #[case("Sip1")]
    #[case("orders/eu")]
    #[case(" padded ")]
    fn non_blank_subjects_are_kept_verbatim(#[case] raw: &str) {
        let subject = Subject::parse(raw).unwrap();
        assert_eq!(subject.as_str(), raw);
    }
}

//! Processor configuration.
//!
//! Raw fields keep whatever the caller wrote (including zero or negative
//! values); the accessors apply the fallbacks and are what the engine reads.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SpoolError;

pub const DEFAULT_POLL_INTERVAL_MS: i64 = 2000;
pub const DEFAULT_CONCURRENCY: i64 = 4;
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Tick period of each subject's poll loop.
    pub poll_interval_ms: i64,

    /// Global cap on running dispatches across all subjects.
    pub concurrency: i64,

    /// Optional per-dispatch timeout. A handler that never returns holds its
    /// slot forever unless this is set.
    pub dispatch_timeout_ms: Option<u64>,

    /// Capacity of the broadcast event feed.
    pub event_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            concurrency: DEFAULT_CONCURRENCY,
            dispatch_timeout_ms: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ProcessorConfig {
    pub fn new(poll_interval_ms: i64, concurrency: i64) -> Self {
        Self {
            poll_interval_ms,
            concurrency,
            ..Self::default()
        }
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn from_json_str(s: &str) -> Result<Self, SpoolError> {
        serde_json::from_str(s).map_err(|e| SpoolError::InvalidConfig(e.to_string()))
    }

    pub fn poll_interval(&self) -> Duration {
        let ms = if self.poll_interval_ms > 0 {
            self.poll_interval_ms
        } else {
            DEFAULT_POLL_INTERVAL_MS
        };
        Duration::from_millis(ms as u64)
    }

    pub fn concurrency_cap(&self) -> usize {
        let cap = if self.concurrency > 0 {
            self.concurrency
        } else {
            DEFAULT_CONCURRENCY
        };
        cap as usize
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 2000)]
    #[case(-5, 2000)]
    #[case(1, 1)]
    #[case(500, 500)]
    fn poll_interval_falls_back_when_not_positive(#[case] raw: i64, #[case] expected_ms: u64) {
        let cfg = ProcessorConfig::new(raw, 1);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(expected_ms));
    }

    #[rstest]
    #[case(0, 4)]
    #[case(-1, 4)]
    #[case(2, 2)]
    fn concurrency_falls_back_when_not_positive(#[case] raw: i64, #[case] expected: usize) {
        let cfg = ProcessorConfig::new(100, raw);
        assert_eq!(cfg.concurrency_cap(), expected);
    }

    #[rstest]
    #[case(None, None)]
    #[case(Some(0), None)]
    #[case(Some(250), Some(Duration::from_millis(250)))]
    fn zero_timeout_means_none(#[case] raw: Option<u64>, #[case] expected: Option<Duration>) {
        let cfg = ProcessorConfig {
            dispatch_timeout_ms: raw,
            ..Default::default()
        };
        assert_eq!(cfg.dispatch_timeout(), expected);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let cfg = ProcessorConfig::from_json_str(r#"{ "concurrency": 2 }"#).unwrap();
        assert_eq!(cfg.concurrency_cap(), 2);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(2000));
        assert_eq!(cfg.event_capacity(), DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = ProcessorConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, SpoolError::InvalidConfig(_)));
    }
}

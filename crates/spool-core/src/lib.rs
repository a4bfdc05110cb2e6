//! spool-core
//!
//! In-process, per-subject message buffering with throttled async processing.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, subject, envelope, outcome, events）
//! - **queue**: BufferStore（subject ごとの pending / processed）と EventSink
//! - **lifecycle**: subject ごとの poll loop の起動・破棄
//! - **runtime**: MessageHandler / AdmissionPredicate とクロージャアダプタ
//! - **worker**: 並列数スロットと 1 件の dispatch
//! - **processor**: 公開 API（push, get_pending, clear_processed, subscribe）
//! - **observability**: QueueCounts と EventBus
//! - **config** / **error**

pub mod builder;
pub mod config;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod processor;
pub mod queue;
pub mod runtime;
pub mod worker;

pub use builder::ProcessorBuilder;
pub use config::ProcessorConfig;
pub use domain::{BufferEvent, Envelope, EnvelopeId, EventKind, MessageId, Outcome, OutcomeKind, Subject};
pub use error::{ProcessError, SpoolError};
pub use observability::QueueCounts;
pub use processor::{Processor, PushOptions};
pub use queue::MessageState;
pub use runtime::{
    AdmissionPredicate, MessageHandler, blocking_handler_fn, handler_fn, predicate_fn,
};

//! ProcessorBuilder - Processor の構築とワイヤリング
//!
//! - handler / admission を構築時にまとめて登録できる
//! - build() は runtime が無ければ失敗する（Fail-fast）

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::config::ProcessorConfig;
use crate::error::SpoolError;
use crate::processor::Processor;
use crate::runtime::{AdmissionPredicate, MessageHandler};

/// # 使用例
/// ```ignore
/// let processor = ProcessorBuilder::<String>::new()
///     .poll_interval_ms(500)
///     .concurrency(8)
///     .handler(blocking_handler_fn(|msg: String| { println!("{msg}"); Ok(()) }))
///     .build()?;
/// ```
pub struct ProcessorBuilder<T: Clone + Send + 'static> {
    config: ProcessorConfig,
    handler: Option<Arc<dyn MessageHandler<T>>>,
    admission: Option<Arc<dyn AdmissionPredicate<T>>>,
    runtime: Option<Handle>,
}

impl<T: Clone + Send + 'static> ProcessorBuilder<T> {
    pub fn new() -> Self {
        Self {
            config: ProcessorConfig::default(),
            handler: None,
            admission: None,
            runtime: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn poll_interval_ms(mut self, ms: i64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn concurrency(mut self, cap: i64) -> Self {
        self.config.concurrency = cap;
        self
    }

    pub fn dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_dispatch_timeout(timeout);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.with_event_capacity(capacity);
        self
    }

    pub fn handler<H: MessageHandler<T> + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn admission<P: AdmissionPredicate<T> + 'static>(mut self, predicate: P) -> Self {
        self.admission = Some(Arc::new(predicate));
        self
    }

    /// Drive poll loops and dispatches on this runtime instead of the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<Processor<T>, SpoolError> {
        let processor = match self.runtime {
            Some(handle) => Processor::with_runtime(self.config, handle),
            None => Processor::new(self.config)?,
        };
        if let Some(handler) = self.handler {
            processor.register_handler_arc(handler);
        }
        if let Some(predicate) = self.admission {
            processor.register_admission_arc(predicate);
        }
        Ok(processor)
    }
}

impl<T: Clone + Send + 'static> Default for ProcessorBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use crate::runtime::{handler_fn, predicate_fn};

    #[tokio::test]
    async fn build_wires_config_and_handler() {
        let processor = ProcessorBuilder::<u32>::new()
            .poll_interval_ms(-1)
            .concurrency(3)
            .event_capacity(16)
            .handler(handler_fn(|_: u32| async { Ok::<(), ProcessError>(()) }))
            .admission(predicate_fn(|n: &u32| *n > 0))
            .build()
            .unwrap();

        assert_eq!(processor.concurrency_cap(), 3);
        assert_eq!(processor.config().event_capacity(), 16);
        assert_eq!(processor.config().poll_interval(), Duration::from_millis(2000));
        assert!(processor.push("a", 1).is_ok());
    }

    #[tokio::test]
    async fn build_without_handler_still_rejects_pushes() {
        let processor = ProcessorBuilder::<u32>::new().build().unwrap();
        assert!(matches!(
            processor.push("a", 1),
            Err(SpoolError::HandlerNotRegistered)
        ));
    }

    #[test]
    fn build_outside_runtime_needs_a_handle() {
        assert!(matches!(
            ProcessorBuilder::<u32>::new().build(),
            Err(SpoolError::NoRuntime)
        ));

        let rt = tokio::runtime::Runtime::new().unwrap();
        let processor = ProcessorBuilder::<u32>::new()
            .runtime(rt.handle().clone())
            .build();
        assert!(processor.is_ok());
    }
}

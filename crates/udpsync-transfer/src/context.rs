//! Per-transfer handles shared by the pipeline stages.

use std::sync::Arc;

use crate::logging::{EventSink, TracingLogger, TransferLogger};
use crate::stats::TransferStats;

/// Label, event logger and counters for one transfer.
///
/// Cloning is cheap; each pipeline thread takes its own clone.
#[derive(Clone)]
pub struct TransferContext {
    label: Arc<str>,
    logger: Arc<dyn TransferLogger>,
    stats: Arc<TransferStats>,
}

impl TransferContext {
    /// Context logging through `tracing` with fresh counters.
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            label: label.into(),
            logger: Arc::new(TracingLogger),
            stats: Arc::new(TransferStats::new()),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stats(&self) -> &Arc<TransferStats> {
        &self.stats
    }

    pub(crate) fn sink(&self, component: &'static str) -> EventSink {
        EventSink::new(self.logger.clone(), component, self.label.clone())
    }
}

impl std::fmt::Debug for TransferContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferContext")
            .field("label", &self.label)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

use crate::backoff::{BackoffLedger, BackoffPolicy, DAY};
use crate::runner::{LogProgress, Progress, ProgressSink};
use crate::store::CatalogStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Shared resources handed to every task run.
#[derive(Clone)]
pub struct TaskContext {
    pub store: CatalogStore,
    pub ledger: BackoffLedger,

    /// In-flight limit for fan-out inside a task.
    pub concurrency: usize,

    /// First interval of the exponential backoff recorded for transient failures.
    pub retry_base: Duration,

    /// Cancelled when the process shuts down. Tasks may bail out of long fan-outs
    /// early; the scheduler itself only stops at task boundaries.
    pub cancellation_token: CancellationToken,

    progress_sink: Arc<dyn ProgressSink>,
}

impl TaskContext {
    pub fn new(store: CatalogStore, ledger: BackoffLedger) -> Self {
        Self {
            store,
            ledger,
            concurrency: DEFAULT_CONCURRENCY,
            retry_base: DAY,
            cancellation_token: CancellationToken::new(),
            progress_sink: Arc::new(LogProgress),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Policy for failures worth retrying later.
    pub fn retry_policy(&self) -> BackoffPolicy {
        BackoffPolicy::Exponential {
            base: self.retry_base,
        }
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sink = sink;
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn progress(&self, label: &str) -> Progress {
        Progress::new(label, Arc::clone(&self.progress_sink))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

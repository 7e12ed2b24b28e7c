//! Bounded-concurrency batch execution.
//!
//! Items are split into chunks of `concurrency`; every item in a chunk runs
//! concurrently under its own retry loop, and the next chunk starts only once
//! the whole chunk has settled. Results land at their input index.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;

use crate::config::schema::BatchConfig;
use crate::observability::metrics;
use crate::resilience::error::{OperationError, ResilienceError};
use crate::resilience::policy::RetryPolicy;
use crate::resilience::retries::RetryExecutor;

/// Progress observer: `(completed, total)`.
pub type OnProgress = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Options for one batch run.
#[derive(Clone)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub on_progress: Option<OnProgress>,
}

impl BatchOptions {
    pub fn new(concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            concurrency,
            retry,
            on_progress: None,
        }
    }

    /// Options from the `[batch]` section, merging its retry overrides over
    /// `base`.
    pub fn from_config(config: &BatchConfig, base: &RetryPolicy) -> Self {
        Self::new(config.concurrency, base.merged(&config.retry))
    }

    pub fn with_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(f));
        self
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default(), &RetryPolicy::default())
    }
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("concurrency", &self.concurrency)
            .field("retry", &self.retry)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Outcome of one batch item.
#[derive(Debug)]
pub struct BatchItemOutcome<I, T> {
    pub index: usize,
    pub item: I,
    pub result: Result<T, ResilienceError>,
}

impl<I, T> BatchItemOutcome<I, T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcomes of a batch, in input order.
#[derive(Debug)]
pub struct BatchReport<I, T> {
    outcomes: Vec<BatchItemOutcome<I, T>>,
}

impl<I, T> BatchReport<I, T> {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn outcomes(&self) -> &[BatchItemOutcome<I, T>] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<BatchItemOutcome<I, T>> {
        self.outcomes
    }

    pub fn into_results(self) -> Vec<Result<T, ResilienceError>> {
        self.outcomes.into_iter().map(|o| o.result).collect()
    }
}

/// Runs many independent operations with chunked concurrency.
pub struct BatchExecutor {
    executor: RetryExecutor,
    concurrency: usize,
    on_progress: Option<OnProgress>,
}

impl BatchExecutor {
    pub fn new(options: BatchOptions) -> Self {
        Self::with_executor(options.clone(), RetryExecutor::new(options.retry))
    }

    /// Use a specific retry executor (and so a specific jitter source).
    pub fn with_executor(options: BatchOptions, executor: RetryExecutor) -> Self {
        Self {
            executor,
            concurrency: options.concurrency.max(1),
            on_progress: options.on_progress,
        }
    }

    /// Run `op(item)` for every item.
    pub async fn execute<I, T, F, Fut>(&self, items: Vec<I>, op: F) -> BatchReport<I, T>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let total = items.len();
        let completed = AtomicUsize::new(0);
        let mut slots: Vec<Option<BatchItemOutcome<I, T>>> = Vec::with_capacity(total);
        slots.resize_with(total, || None);

        tracing::debug!(total, concurrency = self.concurrency, "Starting batch");

        let mut indexed = items.into_iter().enumerate().peekable();
        while indexed.peek().is_some() {
            let chunk: Vec<(usize, I)> = indexed.by_ref().take(self.concurrency).collect();
            let runs = chunk.into_iter().map(|(index, item)| {
                let op = &op;
                let completed = &completed;
                async move {
                    let result = self.executor.execute(|| op(item.clone())).await;
                    metrics::record_batch_item(result.is_ok());
                    if let Err(e) = &result {
                        tracing::debug!(index, error = %e, "Batch item failed");
                    }
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(on_progress) = &self.on_progress {
                        on_progress(done, total);
                    }
                    BatchItemOutcome {
                        index,
                        item,
                        result,
                    }
                }
            });

            for outcome in join_all(runs).await {
                let index = outcome.index;
                slots[index] = Some(outcome);
            }
        }

        let report = BatchReport {
            outcomes: slots.into_iter().flatten().collect(),
        };
        tracing::info!(
            total,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Batch finished"
        );
        report
    }
}

/// Run a batch with one-off options.
pub async fn execute_batch<I, T, F, Fut>(
    items: Vec<I>,
    op: F,
    options: BatchOptions,
) -> BatchReport<I, T>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, OperationError>>,
{
    BatchExecutor::new(options).execute(items, op).await
}

//! Query Executor - request/response use case
//!
//! Runs a single call against the backing service with classification-aware
//! retry and hands back a [`QueryResult`]. Expected failures never escape as
//! errors or panics.

use crate::domain::entities::{BatchResult, CategorizedError, QueryResult};
use crate::domain::ports::{ServiceError, UserNotifier};
use crate::domain::services::ErrorClassifier;
use crate::domain::value_objects::ConnectionStatus;
use crate::infrastructure::ConnectionMonitor;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Per-call execution options.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Retry recoverable failures
    pub retry_on_failure: bool,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Constant delay between attempts
    pub retry_delay: Duration,
    /// Surface the final failure through the user notifier
    pub show_error_to_user: bool,
    /// Free-form metadata attached to log lines
    pub context: Option<serde_json::Value>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            retry_on_failure: true,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            show_error_to_user: true,
            context: None,
        }
    }
}

impl QueryOptions {
    pub fn with_retry_on_failure(mut self, retry: bool) -> Self {
        self.retry_on_failure = retry;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_show_error_to_user(mut self, show: bool) -> Self {
        self.show_error_to_user = show;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Executes calls against the backing service.
///
/// Consults the connection monitor before each call:
/// 1. `Connected` - the call goes ahead
/// 2. `Connecting` - waits once for the settle delay, then re-checks
/// 3. anything else - short-circuits with a network error, nothing is sent
pub struct QueryExecutor {
    monitor: ConnectionMonitor,
    classifier: ErrorClassifier,
    notifier: Arc<dyn UserNotifier>,
    settle_delay: Duration,
}

impl QueryExecutor {
    /// Create an executor with the default classification rules.
    pub fn new(monitor: ConnectionMonitor, notifier: Arc<dyn UserNotifier>) -> Self {
        Self {
            monitor,
            classifier: ErrorClassifier::new(),
            notifier,
            settle_delay: Duration::from_millis(1000),
        }
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// How long to wait for a `Connecting` monitor before giving up.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    /// Run `operation`, retrying recoverable failures per `options`.
    ///
    /// `operation` is invoked once per attempt and must produce a fresh
    /// future each time.
    pub async fn execute_query<T, F, Fut>(&self, mut operation: F, options: QueryOptions) -> QueryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        if let Err(error) = self.ensure_connected().await {
            return self.fail(error, &options, 0);
        }

        let mut retries = 0;
        loop {
            match self.attempt(&mut operation).await {
                Ok(data) => {
                    if retries > 0 {
                        tracing::debug!(retries, context = ?options.context, "query succeeded after retry");
                    }
                    return QueryResult::Success(data);
                }
                Err(error) => {
                    let retry = options.retry_on_failure
                        && retries < options.max_retries
                        && error.is_recoverable();
                    if !retry {
                        return self.fail(error, &options, retries);
                    }

                    retries += 1;
                    tracing::debug!(
                        category = %error.category(),
                        context = ?options.context,
                        "query failed, retry {}/{} in {:?}: {}",
                        retries,
                        options.max_retries,
                        options.retry_delay,
                        error.original()
                    );
                    tokio::time::sleep(options.retry_delay).await;
                }
            }
        }
    }

    /// Run a write. Never retried, whatever `options` say.
    pub async fn execute_mutation<T, F, Fut>(&self, operation: F, options: QueryOptions) -> QueryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let options = options.with_retry_on_failure(false).with_max_retries(0);
        self.execute_query(operation, options).await
    }

    /// Like [`execute_query`](Self::execute_query) but never surfaces
    /// failures to the user. For background and best-effort calls.
    pub async fn execute_silent_query<T, F, Fut>(&self, operation: F, options: QueryOptions) -> QueryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let options = options.with_show_error_to_user(false);
        self.execute_query(operation, options).await
    }

    /// Run every operation concurrently. Does not stop at the first failure.
    pub async fn execute_batch<T, F, Fut>(&self, operations: Vec<F>, options: QueryOptions) -> BatchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let calls = operations
            .into_iter()
            .map(|operation| self.execute_query(operation, options.clone()));
        let batch = BatchResult::from_results(join_all(calls).await);

        if !batch.all_succeeded {
            tracing::warn!(
                failed = batch.errors.len(),
                total = batch.results.len(),
                "batch finished with failures"
            );
        }
        batch
    }

    async fn ensure_connected(&self) -> Result<(), CategorizedError> {
        match self.monitor.status() {
            ConnectionStatus::Connected => Ok(()),
            ConnectionStatus::Connecting => {
                tokio::time::sleep(self.settle_delay).await;
                match self.monitor.status() {
                    ConnectionStatus::Connected => Ok(()),
                    status => Err(self.classifier.not_connected(status)),
                }
            }
            status => Err(self.classifier.not_connected(status)),
        }
    }

    async fn attempt<T, F, Fut>(&self, operation: &mut F) -> Result<T, CategorizedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        match AssertUnwindSafe(operation()).catch_unwind().await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(error)) => Err(self.classifier.classify(error)),
            Err(payload) => Err(self.classifier.panicked(panic_message(payload.as_ref()))),
        }
    }

    fn fail<T>(&self, error: CategorizedError, options: &QueryOptions, retries: u32) -> QueryResult<T> {
        tracing::warn!(
            category = %error.category(),
            severity = %error.severity(),
            code = ?error.original().code,
            retries,
            context = ?options.context,
            "query failed: {}",
            error.original()
        );
        if options.show_error_to_user {
            self.notifier.notify_error(&error);
        }
        QueryResult::Failure(error)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("operation panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("operation panicked: {}", s)
    } else {
        "operation panicked".to_string()
    }
}

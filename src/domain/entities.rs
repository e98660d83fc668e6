//! Domain Entities - Core objects of the data-access layer
//!
//! These carry the results of probes, queries and change feeds between the
//! resilience components and their callers.

use crate::domain::ports::ServiceError;
use crate::domain::value_objects::{ChangeType, ErrorCategory, Severity, SubscriptionPhase};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Why a health probe was reported unhealthy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthCheckError {
    #[error("health check timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("health probe failed: {0}")]
    Probe(ServiceError),
}

impl HealthCheckError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HealthCheckError::Timeout { .. })
    }
}

/// Outcome of a single health probe.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub healthy: bool,
    /// Round-trip time of the probe; absent when the probe timed out
    pub latency_ms: Option<u64>,
    pub error: Option<HealthCheckError>,
    pub observed_at: Instant,
}

impl HealthCheckResult {
    pub fn success(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            latency_ms: Some(latency_ms),
            error: None,
            observed_at: Instant::now(),
        }
    }

    pub fn failure(error: HealthCheckError, latency_ms: Option<u64>) -> Self {
        Self {
            healthy: false,
            latency_ms,
            error: Some(error),
            observed_at: Instant::now(),
        }
    }
}

/// A classified failure, carrying what the user should see and what went wrong.
///
/// Built once by the error classifier and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{category} error: {user_message}")]
pub struct CategorizedError {
    category: ErrorCategory,
    user_message: String,
    original: ServiceError,
    severity: Severity,
    recoverable: bool,
}

impl CategorizedError {
    /// Build an error whose severity and recoverability follow its category.
    pub fn new(category: ErrorCategory, user_message: impl Into<String>, original: ServiceError) -> Self {
        Self {
            category,
            user_message: user_message.into(),
            original,
            severity: category.severity(),
            recoverable: category.is_recoverable(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn original(&self) -> &ServiceError {
        &self.original
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }
}

/// Result of a call made through the query executor.
///
/// Expected failures are values, never panics or propagated errors.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult<T> {
    Success(T),
    Failure(CategorizedError),
}

impl<T> QueryResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, QueryResult::Success(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            QueryResult::Success(data) => Some(data),
            QueryResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CategorizedError> {
        match self {
            QueryResult::Success(_) => None,
            QueryResult::Failure(error) => Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, CategorizedError> {
        match self {
            QueryResult::Success(data) => Ok(data),
            QueryResult::Failure(error) => Err(error),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> QueryResult<U> {
        match self {
            QueryResult::Success(data) => QueryResult::Success(f(data)),
            QueryResult::Failure(error) => QueryResult::Failure(error),
        }
    }
}

impl<T> From<QueryResult<T>> for Result<T, CategorizedError> {
    fn from(result: QueryResult<T>) -> Self {
        result.into_result()
    }
}

/// Aggregate outcome of a batch of concurrently executed calls.
#[derive(Debug, Clone)]
pub struct BatchResult<T> {
    /// One result per operation, in submission order
    pub results: Vec<QueryResult<T>>,
    pub all_succeeded: bool,
    /// Errors in submission order
    pub errors: Vec<CategorizedError>,
}

impl<T> BatchResult<T> {
    pub fn from_results(results: Vec<QueryResult<T>>) -> Self {
        let errors: Vec<CategorizedError> = results
            .iter()
            .filter_map(|r| r.error().cloned())
            .collect();
        Self {
            all_succeeded: errors.is_empty(),
            results,
            errors,
        }
    }
}

/// A row change pushed by the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "eventType")]
    pub event_type: ChangeType,
    pub table: String,
    #[serde(default)]
    pub old: Option<serde_json::Value>,
    #[serde(default)]
    pub new: Option<serde_json::Value>,
}

impl ChangeEvent {
    pub fn insert(table: impl Into<String>, row: serde_json::Value) -> Self {
        Self {
            event_type: ChangeType::Insert,
            table: table.into(),
            old: None,
            new: Some(row),
        }
    }

    pub fn update(table: impl Into<String>, old: serde_json::Value, new: serde_json::Value) -> Self {
        Self {
            event_type: ChangeType::Update,
            table: table.into(),
            old: Some(old),
            new: Some(new),
        }
    }

    pub fn delete(table: impl Into<String>, old: serde_json::Value) -> Self {
        Self {
            event_type: ChangeType::Delete,
            table: table.into(),
            old: Some(old),
            new: None,
        }
    }
}

/// Everything a transport can push into an open channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The transport confirmed the subscription
    Subscribed,
    /// The channel was closed by the server or the client
    Closed,
    /// The channel failed; the message comes from the transport
    ChannelError(String),
    /// The subscription request or heartbeat timed out
    TimedOut,
    /// A row change matching the channel's spec
    Change(ChangeEvent),
}

/// Read-only snapshot of a managed subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStatus {
    pub id: String,
    pub table: String,
    pub active: bool,
    pub reconnect_attempts: u32,
    pub phase: SubscriptionPhase,
}

//! datalink Library
//!
//! Resilient data-access layer: connection monitoring, guarded query
//! execution with classified errors, and self-healing live subscriptions.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use application::{QueryExecutor, QueryOptions, SubscriptionHandle, SubscriptionManager, SubscriptionOptions};
pub use config::{Config, ConfigError};
pub use domain::entities::{
    BatchResult, CategorizedError, ChangeEvent, ChannelEvent, HealthCheckError, HealthCheckResult,
    QueryResult, SubscriptionStatus,
};
pub use domain::ports::{
    ChannelHandle, ChannelSink, ChannelSpec, DataEndpoint, NoticeSource, RealtimeEndpoint,
    ServiceError, TerminalNotice, UserNotifier,
};
pub use domain::services::ErrorClassifier;
pub use domain::value_objects::{
    ChangeType, ConnectionStatus, ErrorCategory, EventFilter, Severity, StatusChange,
    SubscriptionPhase,
};
pub use infrastructure::{ConnectionMonitor, ListenerHandle, ListenerId, MonitorConfig};

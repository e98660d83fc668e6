//! Application Layer
//!
//! Use cases built on the connection monitor: guarded query execution and
//! live subscriptions.

pub mod query_executor;
pub mod subscription_manager;

pub use query_executor::{QueryExecutor, QueryOptions};
pub use subscription_manager::{
    ChangeCallback, ErrorHandler, SubscriptionHandle, SubscriptionManager, SubscriptionOptions,
};

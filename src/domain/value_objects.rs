//! Value Objects
//!
//! Small `Copy` enums shared by every layer: connection status and its
//! transitions, error categories with their severity, change types and
//! subscription phases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reachability of the backing service as believed by the connection monitor.
///
/// Only the monitor writes this value. Everything else reads it or listens
/// for [`StatusChange`] notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Not initialized, or torn down via `cleanup()`
    Disconnected,
    /// A probe is in flight
    Connecting,
    /// The last probe succeeded
    Connected,
    /// The last probe failed
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single status transition, as delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub previous: ConnectionStatus,
    pub current: ConnectionStatus,
}

impl StatusChange {
    /// True when the transition enters `Connected` from any other status.
    pub fn is_recovery(&self) -> bool {
        self.current.is_connected() && !self.previous.is_connected()
    }
}

/// Category assigned to a failed call by the error classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Authentication,
    Authorization,
    Validation,
    Network,
    Database,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Validation => "validation",
            Self::Network => "network",
            Self::Database => "database",
            Self::Unknown => "unknown",
        }
    }

    /// Severity reported alongside errors of this category.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Authentication => Severity::High,
            Self::Authorization => Severity::Medium,
            Self::Validation => Severity::Low,
            Self::Network => Severity::Medium,
            Self::Database => Severity::High,
            Self::Unknown => Severity::Critical,
        }
    }

    /// Whether a failure of this category may succeed if simply retried.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network => true,
            Self::Authentication
            | Self::Authorization
            | Self::Validation
            | Self::Database
            | Self::Unknown => false,
        }
    }

    /// Message shown to end users when no more specific one applies.
    pub fn default_user_message(&self) -> &'static str {
        match self {
            Self::Authentication => "Your session has expired. Please sign in again.",
            Self::Authorization => "You do not have permission to perform this action.",
            Self::Validation => "The submitted data is invalid. Please review it and try again.",
            Self::Network => {
                "Unable to reach the server. Please check your connection and try again."
            }
            Self::Database => "Something went wrong while accessing your data. Please try again.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How loudly an error should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Kind of row change carried by a change-feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// Which change types a channel wants to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventFilter {
    All,
    Only(ChangeType),
}

impl EventFilter {
    pub fn matches(&self, change: ChangeType) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(wanted) => *wanted == change,
        }
    }

    /// Wire representation used by change-feed transports (`*`, `INSERT`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFilter::All => "*",
            EventFilter::Only(ChangeType::Insert) => "INSERT",
            EventFilter::Only(ChangeType::Update) => "UPDATE",
            EventFilter::Only(ChangeType::Delete) => "DELETE",
        }
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        EventFilter::All
    }
}

/// Lifecycle phase of a managed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionPhase {
    /// Channel requested, waiting for the transport to confirm
    Connecting,
    /// Transport confirmed the channel
    Active,
    /// Waiting out the reconnect delay before reopening
    Reconnecting,
    /// Reconnect ceiling reached; never retried automatically
    PermanentlyInactive,
}

impl fmt::Display for SubscriptionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionPhase::Connecting => write!(f, "connecting"),
            SubscriptionPhase::Active => write!(f, "active"),
            SubscriptionPhase::Reconnecting => write!(f, "reconnecting"),
            SubscriptionPhase::PermanentlyInactive => write!(f, "permanently-inactive"),
        }
    }
}

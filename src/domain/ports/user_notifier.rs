//! User Notifier Port
//!
//! Surfaces failures to the end user (toasts, banners, push messages).

use crate::domain::entities::CategorizedError;

/// Where a terminal notice originated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeSource {
    ConnectionMonitor,
    Subscription(String),
}

/// A failure that automatic recovery has given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalNotice {
    pub source: NoticeSource,
    pub message: String,
}

/// Outbound port for user-visible failure reporting.
pub trait UserNotifier: Send + Sync {
    /// Report a query failure that exhausted its retries.
    fn notify_error(&self, error: &CategorizedError);

    /// Report that automatic recovery stopped and manual action is needed.
    fn notify_terminal(&self, notice: &TerminalNotice);
}

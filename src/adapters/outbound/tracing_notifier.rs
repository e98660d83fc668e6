//! Tracing Notifier
//!
//! Implements UserNotifier by writing user-facing messages to the log.
//! Stands in for a UI toast/banner sink in headless deployments.

use crate::domain::entities::CategorizedError;
use crate::domain::ports::{NoticeSource, TerminalNotice, UserNotifier};
use crate::domain::value_objects::Severity;

/// Logs every user-facing message, at a level matching its severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl TracingNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl UserNotifier for TracingNotifier {
    fn notify_error(&self, error: &CategorizedError) {
        let category = error.category().to_string();
        let message = error.user_message();
        match error.severity() {
            Severity::Critical | Severity::High => {
                tracing::error!(%category, "{}", message)
            }
            Severity::Medium => tracing::warn!(%category, "{}", message),
            Severity::Low => tracing::info!(%category, "{}", message),
        }
    }

    fn notify_terminal(&self, notice: &TerminalNotice) {
        match &notice.source {
            NoticeSource::ConnectionMonitor => {
                tracing::error!(source = "connection", "{}", notice.message)
            }
            NoticeSource::Subscription(id) => {
                tracing::error!(source = "subscription", subscription = %id, "{}", notice.message)
            }
        }
    }
}

//! Fakes shared by unit tests.

use crate::domain::entities::CategorizedError;
use crate::domain::ports::{DataEndpoint, ServiceError, TerminalNotice, UserNotifier};
use crate::infrastructure::{ConnectionMonitor, MonitorConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Probe target whose health can be flipped at runtime.
pub struct FakeEndpoint {
    healthy: AtomicBool,
    delay: Duration,
    probes: AtomicUsize,
}

impl FakeEndpoint {
    pub fn new(healthy: bool) -> Arc<Self> {
        Self::with_delay(healthy, Duration::ZERO)
    }

    pub fn with_delay(healthy: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(healthy),
            delay,
            probes: AtomicUsize::new(0),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataEndpoint for FakeEndpoint {
    async fn probe(&self) -> Result<(), ServiceError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServiceError::new("connection refused"))
        }
    }
}

/// Notifier that keeps everything it was asked to surface.
#[derive(Default)]
pub struct RecordingNotifier {
    pub errors: Mutex<Vec<CategorizedError>>,
    pub terminal: Mutex<Vec<TerminalNotice>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminal.lock().len()
    }
}

impl UserNotifier for RecordingNotifier {
    fn notify_error(&self, error: &CategorizedError) {
        self.errors.lock().push(error.clone());
    }

    fn notify_terminal(&self, notice: &TerminalNotice) {
        self.terminal.lock().push(notice.clone());
    }
}

/// A monitor that never probes on its own during a test.
pub fn quiet_config() -> MonitorConfig {
    MonitorConfig::default()
        .with_auto_reconnect(false)
        .with_health_check_interval(Duration::from_secs(3600))
}

/// Monitor over `endpoint`, already initialized.
pub async fn initialized_monitor(
    endpoint: Arc<FakeEndpoint>,
    notifier: Arc<RecordingNotifier>,
) -> ConnectionMonitor {
    let monitor = ConnectionMonitor::new(endpoint, notifier, quiet_config());
    monitor.initialize().await;
    monitor
}

//! Connection Monitor
//!
//! Maintains the single authoritative belief about whether the backing
//! service is reachable. Probes it periodically, drives the status state
//! machine, runs the fixed-delay reconnection sequence and broadcasts every
//! transition to registered listeners.

use crate::domain::entities::{HealthCheckError, HealthCheckResult};
use crate::domain::ports::{DataEndpoint, NoticeSource, TerminalNotice, UserNotifier};
use crate::domain::value_objects::{ConnectionStatus, StatusChange};
use crate::infrastructure::listeners::{ListenerHandle, ListenerRegistry};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Message surfaced once the reconnection sequence gives up.
pub const CONNECTION_LOST_MESSAGE: &str =
    "Connection to the server was lost and could not be restored. Please reload the application.";

/// Connection monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between periodic health probes
    pub health_check_interval: Duration,
    /// Hard timeout for each probe
    pub health_check_timeout: Duration,
    /// Start the reconnection sequence when a probe fails
    pub auto_reconnect: bool,
    /// Failed reconnection attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Fixed delay before each reconnection attempt
    pub reconnect_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl MonitorConfig {
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Transitions waiting to be delivered, in the order they happened.
#[derive(Default)]
struct DeliveryQueue {
    pending: VecDeque<StatusChange>,
    /// Some caller is currently delivering; everyone else only enqueues
    draining: bool,
}

struct MonitorInner {
    config: MonitorConfig,
    endpoint: Arc<dyn DataEndpoint>,
    notifier: Arc<dyn UserNotifier>,
    status: Mutex<ConnectionStatus>,
    delivery: Mutex<DeliveryQueue>,
    listeners: Arc<ListenerRegistry<StatusChange>>,
    reconnect_attempts: AtomicU32,
    /// Set once the current outage has been reported as terminal
    terminal_reported: AtomicBool,
    /// Set by `cleanup`; keeps background tasks from being restarted
    stopped: AtomicBool,
    last_result: Mutex<Option<HealthCheckResult>>,
    probe_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

/// Connection health monitor.
///
/// Cheap to clone; clones share the same state. Background tasks hold only
/// weak references and stop once every handle is dropped.
#[derive(Clone)]
pub struct ConnectionMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectionMonitor {
    /// Create a new monitor. Nothing runs until [`initialize`](Self::initialize).
    pub fn new(
        endpoint: Arc<dyn DataEndpoint>,
        notifier: Arc<dyn UserNotifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                endpoint,
                notifier,
                status: Mutex::new(ConnectionStatus::Disconnected),
                delivery: Mutex::new(DeliveryQueue::default()),
                listeners: Arc::new(ListenerRegistry::new()),
                reconnect_attempts: AtomicU32::new(0),
                terminal_reported: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                last_result: Mutex::new(None),
                probe_task: Mutex::new(None),
                reconnect_task: Mutex::new(None),
            }),
        }
    }

    fn from_inner(inner: Arc<MonitorInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Current status. Never performs I/O.
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.lock()
    }

    /// Failed reconnection attempts in the current outage.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Result of the most recent probe, for diagnostics only.
    pub fn last_health_check(&self) -> Option<HealthCheckResult> {
        self.inner.last_result.lock().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Register a callback for status transitions.
    ///
    /// The callback runs on every change of status, never for a repeated
    /// identical status. It must not block. It may call back into the
    /// monitor; transitions it causes are delivered after it returns.
    pub fn on_status_change<F>(&self, listener: F) -> ListenerHandle<StatusChange>
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        let id = self.inner.listeners.register(listener);
        ListenerHandle::new(id, &self.inner.listeners)
    }

    /// Probe once, then start the periodic loop regardless of the outcome.
    ///
    /// Must be called once at startup.
    pub async fn initialize(&self) -> ConnectionStatus {
        tracing::info!("initializing connection monitor");
        self.inner.stopped.store(false, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Connecting);

        let result = self.check_health().await;
        if result.healthy {
            self.mark_connected();
        } else {
            self.set_status(ConnectionStatus::Error);
            if self.inner.config.auto_reconnect {
                self.start_reconnection();
            }
        }

        self.start_periodic_checks();
        self.status()
    }

    /// Issue one probe with a hard timeout.
    ///
    /// A probe that outlives `health_check_timeout` is reported unhealthy even
    /// if it would eventually have succeeded.
    pub async fn check_health(&self) -> HealthCheckResult {
        let timeout = self.inner.config.health_check_timeout;
        let start = tokio::time::Instant::now();

        let result = match tokio::time::timeout(timeout, self.inner.endpoint.probe()).await {
            Ok(Ok(())) => HealthCheckResult::success(start.elapsed().as_millis() as u64),
            Ok(Err(e)) => HealthCheckResult::failure(
                HealthCheckError::Probe(e),
                Some(start.elapsed().as_millis() as u64),
            ),
            Err(_) => HealthCheckResult::failure(
                HealthCheckError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                },
                None,
            ),
        };

        match &result.error {
            None => tracing::debug!(latency_ms = ?result.latency_ms, "health probe succeeded"),
            Some(e) => tracing::debug!("health probe failed: {}", e),
        }

        *self.inner.last_result.lock() = Some(result.clone());
        result
    }

    /// Force an immediate reconnection attempt regardless of current status.
    ///
    /// Resets the attempt counter and cancels a running reconnection
    /// sequence. Returns whether the service is reachable afterwards.
    pub async fn reconnect(&self) -> bool {
        if let Some(task) = self.inner.reconnect_task.lock().take() {
            task.abort();
        }
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        self.inner.terminal_reported.store(false, Ordering::SeqCst);

        tracing::info!("manual reconnect requested");
        self.set_status(ConnectionStatus::Connecting);

        if self.check_health().await.healthy {
            self.mark_connected();
            true
        } else {
            self.set_status(ConnectionStatus::Error);
            if self.inner.config.auto_reconnect {
                self.start_reconnection();
            }
            false
        }
    }

    /// Stop all background work, drop every listener and go `Disconnected`.
    pub fn cleanup(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.inner.probe_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.inner.reconnect_task.lock().take() {
            task.abort();
        }
        self.inner.listeners.clear();
        self.set_status(ConnectionStatus::Disconnected);
        tracing::info!("connection monitor stopped");
    }

    /// Start the periodic probe loop, replacing any running one.
    fn start_periodic_checks(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.health_check_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => Self::from_inner(inner).run_periodic_check().await,
                    None => break,
                }
            }
        });

        if let Some(previous) = self.inner.probe_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// One iteration of the periodic loop.
    async fn run_periodic_check(&self) {
        let result = self.check_health().await;
        let current = self.status();

        if current.is_connected() && !result.healthy {
            tracing::warn!("backing service became unreachable");
            self.set_status(ConnectionStatus::Error);
            if self.inner.config.auto_reconnect {
                self.start_reconnection();
            }
        } else if !current.is_connected() && result.healthy {
            tracing::info!("backing service reachable again");
            self.mark_connected();
        }
    }

    /// Start the reconnection sequence unless one is already running.
    fn start_reconnection(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.inner.reconnect_task.lock();
        if slot.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(Self::reconnect_loop(weak)));
    }

    async fn reconnect_loop(weak: Weak<MonitorInner>) {
        loop {
            let delay = match weak.upgrade() {
                Some(inner) => {
                    let monitor = Self::from_inner(inner);
                    if monitor.status().is_connected() {
                        return;
                    }
                    if monitor.reconnect_attempts() >= monitor.inner.config.max_reconnect_attempts {
                        monitor.report_exhausted();
                        return;
                    }
                    monitor.inner.config.reconnect_delay
                }
                None => return,
            };

            tokio::time::sleep(delay).await;

            let monitor = match weak.upgrade() {
                Some(inner) => Self::from_inner(inner),
                None => return,
            };
            if monitor.status().is_connected() {
                return;
            }

            let attempt = monitor.inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::info!(
                "reconnection attempt {}/{}",
                attempt,
                monitor.inner.config.max_reconnect_attempts
            );

            monitor.set_status(ConnectionStatus::Connecting);
            if monitor.check_health().await.healthy {
                monitor.mark_connected();
                return;
            }
            // A periodic probe may have restored the connection meanwhile
            monitor.compare_and_set(ConnectionStatus::Connecting, ConnectionStatus::Error);
        }
    }

    fn mark_connected(&self) {
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        self.inner.terminal_reported.store(false, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Connected);
    }

    fn report_exhausted(&self) {
        if self.inner.terminal_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::error!(
            "giving up after {} reconnection attempts",
            self.inner.config.max_reconnect_attempts
        );
        self.inner.notifier.notify_terminal(&TerminalNotice {
            source: NoticeSource::ConnectionMonitor,
            message: CONNECTION_LOST_MESSAGE.to_string(),
        });
    }

    /// Record a new status and notify listeners if it changed.
    fn set_status(&self, next: ConnectionStatus) {
        self.transition(|current| (current != next).then_some(next));
    }

    fn compare_and_set(&self, expected: ConnectionStatus, next: ConnectionStatus) {
        self.transition(|current| (current == expected && current != next).then_some(next));
    }

    /// Apply a status change and deliver it.
    ///
    /// The status update and the enqueue happen under the queue lock, so the
    /// queue order is the order of the updates. Listeners run with no lock
    /// held; whoever finds the queue idle delivers everything queued,
    /// including changes listeners cause while it is delivering.
    fn transition<F>(&self, decide: F)
    where
        F: FnOnce(ConnectionStatus) -> Option<ConnectionStatus>,
    {
        {
            let mut queue = self.inner.delivery.lock();
            let change = {
                let mut status = self.inner.status.lock();
                match decide(*status) {
                    Some(next) => StatusChange {
                        previous: std::mem::replace(&mut *status, next),
                        current: next,
                    },
                    None => return,
                }
            };
            tracing::info!("connection status {} -> {}", change.previous, change.current);

            queue.pending.push_back(change);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }

        loop {
            let next = {
                let mut queue = self.inner.delivery.lock();
                match queue.pending.pop_front() {
                    Some(change) => change,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            self.inner.listeners.notify(&next);
        }
    }
}

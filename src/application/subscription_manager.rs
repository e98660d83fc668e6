//! Subscription Manager - live change-feed use case
//!
//! Owns every long-lived push subscription ("channel") against the backing
//! service. Each subscription gets one driver task that opens the channel,
//! pumps its events into the caller's callback and reopens it after a fixed
//! delay when the transport reports a failure. After the monitor recovers
//! from an outage, every active subscription is reopened once.

use crate::domain::entities::{ChangeEvent, ChannelEvent, SubscriptionStatus};
use crate::domain::ports::{
    ChannelHandle, ChannelSpec, NoticeSource, RealtimeEndpoint, TerminalNotice, UserNotifier,
};
use crate::domain::value_objects::{ConnectionStatus, EventFilter, StatusChange, SubscriptionPhase};
use crate::infrastructure::listeners::ListenerHandle;
use crate::infrastructure::ConnectionMonitor;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Callback receiving change events. Errors are logged and forwarded to the
/// subscription's error handler; they never stop the subscription.
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) -> anyhow::Result<()> + Send + Sync>;

/// Receives failures raised by a subscription's callback.
pub type ErrorHandler = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// What to subscribe to and how to recover.
#[derive(Clone)]
pub struct SubscriptionOptions {
    pub channel: ChannelSpec,
    /// Failed reopen attempts before the subscription is given up
    pub max_reconnect_attempts: u32,
    /// Fixed delay before each reopen
    pub reconnect_delay: Duration,
    pub on_error: Option<ErrorHandler>,
}

impl SubscriptionOptions {
    /// Subscribe to every change of `table` in the `public` schema.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            channel: ChannelSpec::new(table),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(3),
            on_error: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.channel.schema = schema.into();
        self
    }

    pub fn with_event(mut self, event: EventFilter) -> Self {
        self.channel.event = event;
        self
    }

    /// Row filter in the transport's syntax, e.g. `student_id=eq.42`.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.channel.filter = Some(filter.into());
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

    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&anyhow::Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("channel", &self.channel)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// How long `teardown` waits for a driver to release its channel before
/// aborting it.
const STOP_GRACE: Duration = Duration::from_secs(5);

enum Control {
    Resubscribe,
    Stop,
}

struct RecordState {
    phase: SubscriptionPhase,
    reconnect_attempts: u32,
    active: bool,
    channel: Option<ChannelHandle>,
}

/// One managed subscription. Only its own driver and the manager touch it.
struct SubscriptionRecord {
    id: String,
    options: SubscriptionOptions,
    callback: ChangeCallback,
    state: Mutex<RecordState>,
    control: mpsc::UnboundedSender<Control>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionRecord {
    fn is_active(&self) -> bool {
        self.state.lock().active
    }

    fn snapshot(&self) -> SubscriptionStatus {
        let state = self.state.lock();
        SubscriptionStatus {
            id: self.id.clone(),
            table: self.options.channel.table.clone(),
            active: state.active,
            reconnect_attempts: state.reconnect_attempts,
            phase: state.phase,
        }
    }

    fn set_phase(&self, phase: SubscriptionPhase) {
        self.state.lock().phase = phase;
    }

    /// Remember the open channel. Returns false if the record was torn down
    /// while the channel was being opened.
    fn store_channel(&self, handle: ChannelHandle) -> bool {
        let mut state = self.state.lock();
        if !state.active {
            return false;
        }
        state.channel = Some(handle);
        true
    }

    fn take_channel(&self) -> Option<ChannelHandle> {
        self.state.lock().channel.take()
    }
}

struct ManagerInner {
    endpoint: Arc<dyn RealtimeEndpoint>,
    notifier: Arc<dyn UserNotifier>,
    records: DashMap<String, Arc<SubscriptionRecord>>,
    monitor_listener: Mutex<Option<ListenerHandle<StatusChange>>>,
}

impl ManagerInner {
    fn on_status_change(&self, change: &StatusChange) {
        if change.is_recovery() {
            let mut resubscribed = 0;
            for entry in self.records.iter() {
                let record = entry.value();
                if record.is_active() && record.control.send(Control::Resubscribe).is_ok() {
                    resubscribed += 1;
                }
            }
            tracing::info!(resubscribed, "connection restored, resubscribing active channels");
        } else if change.current == ConnectionStatus::Error {
            tracing::warn!("connection lost, channels will recover individually");
        }
    }

    /// Ask the record's driver to stop and wait for it to release its own
    /// channel. A driver stuck in the transport is aborted after
    /// `STOP_GRACE` and its channel released here.
    async fn teardown(&self, record: &SubscriptionRecord) {
        let driver = {
            record.state.lock().active = false;
            record.driver.lock().take()
        };
        let _ = record.control.send(Control::Stop);

        if let Some(mut driver) = driver {
            if tokio::time::timeout(STOP_GRACE, &mut driver).await.is_err() {
                tracing::warn!(subscription = %record.id, "driver did not stop in time, aborting");
                driver.abort();
                let _ = driver.await;
            }
        }

        let channel = record.take_channel();
        if let Some(handle) = channel {
            self.endpoint.remove_channel(&handle).await;
        }
    }
}

/// Manages live subscriptions.
///
/// Cheap to clone; clones share the same subscriptions.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

impl SubscriptionManager {
    /// Create a manager and register it with the connection monitor for
    /// bulk recovery.
    pub fn new(
        endpoint: Arc<dyn RealtimeEndpoint>,
        notifier: Arc<dyn UserNotifier>,
        monitor: &ConnectionMonitor,
    ) -> Self {
        let inner = Arc::new(ManagerInner {
            endpoint,
            notifier,
            records: DashMap::new(),
            monitor_listener: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let listener = monitor.on_status_change(move |change| {
            if let Some(inner) = weak.upgrade() {
                inner.on_status_change(change);
            }
        });
        *inner.monitor_listener.lock() = Some(listener);

        Self { inner }
    }

    /// Subscribe `callback` to the channel described by `options`.
    ///
    /// An existing subscription with the same `id` is torn down first; its
    /// channel is closed before the new one is opened.
    pub async fn subscribe<F>(
        &self,
        id: impl Into<String>,
        callback: F,
        options: SubscriptionOptions,
    ) -> SubscriptionHandle
    where
        F: Fn(ChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = id.into();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let record = Arc::new(SubscriptionRecord {
            id: id.clone(),
            options,
            callback: Arc::new(callback),
            state: Mutex::new(RecordState {
                phase: SubscriptionPhase::Connecting,
                reconnect_attempts: 0,
                active: true,
                channel: None,
            }),
            control: control_tx,
            driver: Mutex::new(None),
        });

        if let Some(previous) = self.inner.records.insert(id.clone(), record.clone()) {
            tracing::debug!(subscription = %id, "replacing existing subscription");
            self.inner.teardown(&previous).await;
        }

        let driver = Driver {
            endpoint: self.inner.endpoint.clone(),
            notifier: self.inner.notifier.clone(),
            record: record.clone(),
            control: control_rx,
        };
        *record.driver.lock() = Some(tokio::spawn(driver.run()));

        tracing::info!(
            subscription = %id,
            table = %record.options.channel.table,
            event = record.options.channel.event.as_str(),
            "subscribed"
        );

        SubscriptionHandle {
            id,
            record: Arc::downgrade(&record),
            manager: Arc::downgrade(&self.inner),
        }
    }

    /// Tear down the subscription `id`. Unknown ids are ignored.
    pub async fn unsubscribe(&self, id: &str) {
        match self.inner.records.remove(id) {
            Some((_, record)) => {
                self.inner.teardown(&record).await;
                tracing::info!(subscription = id, "unsubscribed");
            }
            None => tracing::debug!(subscription = id, "unsubscribe for unknown id ignored"),
        }
    }

    /// Tear down every subscription.
    pub async fn unsubscribe_all(&self) {
        let ids: Vec<String> = self.inner.records.iter().map(|e| e.key().clone()).collect();
        let records: Vec<Arc<SubscriptionRecord>> = ids
            .iter()
            .filter_map(|id| self.inner.records.remove(id).map(|(_, r)| r))
            .collect();

        join_all(records.iter().map(|r| self.inner.teardown(r))).await;
        tracing::info!(count = records.len(), "unsubscribed all channels");
    }

    /// Tear down every subscription and stop listening to the monitor.
    pub async fn shutdown(&self) {
        self.unsubscribe_all().await;
        if let Some(listener) = self.inner.monitor_listener.lock().take() {
            listener.unsubscribe();
        }
    }

    /// Subscriptions that are not torn down or permanently inactive.
    pub fn active_subscription_count(&self) -> usize {
        self.inner
            .records
            .iter()
            .filter(|e| e.value().is_active())
            .count()
    }

    pub fn subscription_status(&self, id: &str) -> Option<SubscriptionStatus> {
        self.inner.records.get(id).map(|r| r.snapshot())
    }

    pub fn subscription_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.records.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

/// Returned by [`SubscriptionManager::subscribe`].
///
/// Only ever removes the subscription it was created for, even if the id
/// has since been re-subscribed.
pub struct SubscriptionHandle {
    id: String,
    record: Weak<SubscriptionRecord>,
    manager: Weak<ManagerInner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tear the subscription down. Returns false if it was already gone.
    pub async fn unsubscribe(self) -> bool {
        let (manager, record) = match (self.manager.upgrade(), self.record.upgrade()) {
            (Some(m), Some(r)) => (m, r),
            _ => return false,
        };

        match manager
            .records
            .remove_if(&self.id, |_, current| Arc::ptr_eq(current, &record))
        {
            Some(_) => {
                manager.teardown(&record).await;
                tracing::info!(subscription = %self.id, "unsubscribed");
                true
            }
            None => false,
        }
    }
}

/// How a channel stopped being pumped.
enum PumpExit {
    Failed(String),
    Resubscribe,
}

/// Per-subscription task. Reopen attempts for one id never overlap because
/// they all happen here, one after another.
struct Driver {
    endpoint: Arc<dyn RealtimeEndpoint>,
    notifier: Arc<dyn UserNotifier>,
    record: Arc<SubscriptionRecord>,
    control: mpsc::UnboundedReceiver<Control>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            if !self.record.is_active() {
                return;
            }
            self.record.set_phase(SubscriptionPhase::Connecting);

            let exit = self.open_and_pump().await;
            self.release_channel().await;

            let reason = match exit {
                Some(PumpExit::Resubscribe) => {
                    tracing::debug!(subscription = %self.record.id, "resubscribing");
                    continue;
                }
                Some(PumpExit::Failed(reason)) => reason,
                None => return,
            };

            if !self.schedule_reconnect(&reason) {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.record.options.reconnect_delay) => {}
                Some(control) = self.control.recv() => match control {
                    Control::Resubscribe => {
                        tracing::debug!(subscription = %self.record.id, "reconnect delay cut short by recovery");
                    }
                    Control::Stop => return,
                },
            }
        }
    }

    /// Open a channel and pump it until it fails. `None` means the record
    /// was torn down meanwhile. An open in flight is always completed, so
    /// a channel the transport created is never orphaned.
    async fn open_and_pump(&mut self) -> Option<PumpExit> {
        let (sink, mut events) = mpsc::unbounded_channel();
        let name = format!("{}:{}", self.record.id, Uuid::new_v4());

        let handle = match self
            .endpoint
            .open_channel(&name, &self.record.options.channel, sink)
            .await
        {
            Ok(handle) => handle,
            Err(e) => return Some(PumpExit::Failed(format!("failed to open channel: {}", e))),
        };

        if !self.record.store_channel(handle.clone()) {
            self.endpoint.remove_channel(&handle).await;
            return None;
        }

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ChannelEvent::Subscribed) => self.on_subscribed(),
                    Some(ChannelEvent::Change(change)) => self.deliver(change),
                    Some(ChannelEvent::ChannelError(message)) => {
                        return Some(PumpExit::Failed(format!("channel error: {}", message)));
                    }
                    Some(ChannelEvent::TimedOut) => {
                        return Some(PumpExit::Failed("channel timed out".to_string()));
                    }
                    Some(ChannelEvent::Closed) => {
                        tracing::debug!(subscription = %self.record.id, "channel closed by server");
                    }
                    None => return Some(PumpExit::Failed("event stream ended".to_string())),
                },
                Some(control) = self.control.recv() => match control {
                    Control::Resubscribe => return Some(PumpExit::Resubscribe),
                    Control::Stop => return None,
                },
            }
        }
    }

    fn on_subscribed(&self) {
        {
            let mut state = self.record.state.lock();
            state.phase = SubscriptionPhase::Active;
            state.reconnect_attempts = 0;
        }
        tracing::debug!(subscription = %self.record.id, "channel subscribed");
    }

    /// Run the callback, containing both returned errors and panics.
    fn deliver(&self, change: ChangeEvent) {
        let callback = &self.record.callback;
        let error = match catch_unwind(AssertUnwindSafe(|| callback(change))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(_) => anyhow::anyhow!("subscription callback panicked"),
        };

        tracing::warn!(subscription = %self.record.id, "subscription callback failed: {:#}", error);
        if let Some(handler) = &self.record.options.on_error {
            if catch_unwind(AssertUnwindSafe(|| handler(&error))).is_err() {
                tracing::error!(subscription = %self.record.id, "subscription error handler panicked");
            }
        }
    }

    async fn release_channel(&self) {
        let channel = self.record.take_channel();
        if let Some(handle) = channel {
            self.endpoint.remove_channel(&handle).await;
        }
    }

    /// Count a failed attempt. Returns false once the ceiling is reached and
    /// the subscription has been given up.
    fn schedule_reconnect(&self, reason: &str) -> bool {
        let max = self.record.options.max_reconnect_attempts;
        let attempt = {
            let mut state = self.record.state.lock();
            if !state.active {
                return false;
            }
            if state.reconnect_attempts >= max {
                state.phase = SubscriptionPhase::PermanentlyInactive;
                state.active = false;
                None
            } else {
                state.reconnect_attempts += 1;
                state.phase = SubscriptionPhase::Reconnecting;
                Some(state.reconnect_attempts)
            }
        };

        match attempt {
            Some(attempt) => {
                tracing::warn!(
                    subscription = %self.record.id,
                    "{}; reconnecting in {:?} (attempt {}/{})",
                    reason,
                    self.record.options.reconnect_delay,
                    attempt,
                    max
                );
                true
            }
            None => {
                tracing::error!(
                    subscription = %self.record.id,
                    "{}; giving up after {} reconnection attempts",
                    reason,
                    max
                );
                self.notifier.notify_terminal(&TerminalNotice {
                    source: NoticeSource::Subscription(self.record.id.clone()),
                    message: format!(
                        "Live updates for {} stopped after repeated connection failures. Refresh to resume.",
                        self.record.options.channel.table
                    ),
                });
                false
            }
        }
    }
}

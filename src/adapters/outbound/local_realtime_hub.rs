//! Local Realtime Hub
//!
//! Implements RealtimeEndpoint as an in-process change feed backed by
//! DashMap. Publishers push row changes; every open channel whose spec
//! matches receives them. Lifecycle failures can be injected per channel.

use crate::domain::entities::{ChangeEvent, ChannelEvent};
use crate::domain::ports::{ChannelHandle, ChannelSink, ChannelSpec, RealtimeEndpoint, ServiceError};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Something that happened to a channel, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Opened(String),
    Removed(String),
}

struct HubChannel {
    spec: ChannelSpec,
    sink: ChannelSink,
}

/// In-process change feed.
pub struct LocalRealtimeHub {
    channels: DashMap<String, HubChannel>,
    available: AtomicBool,
    open_attempts: AtomicUsize,
    history: Mutex<Vec<HubEvent>>,
}

impl LocalRealtimeHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            available: AtomicBool::new(true),
            open_attempts: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    /// While unavailable, every `open_channel` fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Push a change to every matching channel. Returns how many received it.
    pub fn publish(&self, schema: &str, change: &ChangeEvent) -> usize {
        let mut delivered = 0;
        for entry in self.channels.iter() {
            let channel = entry.value();
            if !spec_matches(&channel.spec, schema, change) {
                continue;
            }
            if channel.sink.send(ChannelEvent::Change(change.clone())).is_ok() {
                delivered += 1;
            }
        }
        tracing::debug!(table = %change.table, delivered, "published change");
        delivered
    }

    /// Make one channel report `CHANNEL_ERROR`.
    pub fn fail_channel(&self, name: &str, message: &str) -> bool {
        self.emit(name, ChannelEvent::ChannelError(message.to_string()))
    }

    /// Make one channel report `TIMED_OUT`.
    pub fn time_out_channel(&self, name: &str) -> bool {
        self.emit(name, ChannelEvent::TimedOut)
    }

    /// Make every open channel report `CHANNEL_ERROR`.
    pub fn fail_all(&self, message: &str) -> usize {
        self.channels
            .iter()
            .filter(|c| {
                c.sink
                    .send(ChannelEvent::ChannelError(message.to_string()))
                    .is_ok()
            })
            .count()
    }

    /// Name of the open channel whose name starts with `prefix`.
    pub fn channel_for(&self, prefix: &str) -> Option<String> {
        self.channels
            .iter()
            .map(|c| c.key().clone())
            .find(|name| name.starts_with(prefix))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Calls to `open_channel`, including failed ones.
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    pub fn history(&self) -> Vec<HubEvent> {
        self.history.lock().clone()
    }

    /// Successful opens of channels whose name starts with `prefix`.
    pub fn opened_count(&self, prefix: &str) -> usize {
        self.history
            .lock()
            .iter()
            .filter(|e| matches!(e, HubEvent::Opened(name) if name.starts_with(prefix)))
            .count()
    }

    fn emit(&self, name: &str, event: ChannelEvent) -> bool {
        self.channels
            .get(name)
            .map(|c| c.sink.send(event).is_ok())
            .unwrap_or(false)
    }
}

impl Default for LocalRealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeEndpoint for LocalRealtimeHub {
    async fn open_channel(
        &self,
        name: &str,
        spec: &ChannelSpec,
        sink: ChannelSink,
    ) -> Result<ChannelHandle, ServiceError> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(ServiceError::new("realtime endpoint unavailable").with_code("08006"));
        }

        // Confirm before registering so a publish can never overtake it
        let _ = sink.send(ChannelEvent::Subscribed);
        self.channels.insert(
            name.to_string(),
            HubChannel {
                spec: spec.clone(),
                sink,
            },
        );
        self.history.lock().push(HubEvent::Opened(name.to_string()));
        tracing::debug!(channel = name, table = %spec.table, "channel opened");

        Ok(ChannelHandle {
            name: name.to_string(),
        })
    }

    async fn remove_channel(&self, handle: &ChannelHandle) {
        if let Some((name, channel)) = self.channels.remove(&handle.name) {
            let _ = channel.sink.send(ChannelEvent::Closed);
            self.history.lock().push(HubEvent::Removed(name));
            tracing::debug!(channel = %handle.name, "channel removed");
        }
    }
}

fn spec_matches(spec: &ChannelSpec, schema: &str, change: &ChangeEvent) -> bool {
    spec.schema == schema
        && spec.table == change.table
        && spec.event.matches(change.event_type)
        && spec
            .filter
            .as_deref()
            .map(|f| row_filter_matches(f, change))
            .unwrap_or(true)
}

/// Evaluate an equality filter of the form `column=eq.value`.
///
/// Deletes are matched against the old row, everything else against the new
/// one. Unsupported operators never match.
fn row_filter_matches(filter: &str, change: &ChangeEvent) -> bool {
    let (column, expected) = match filter.split_once("=eq.") {
        Some(parts) => parts,
        None => return false,
    };
    let row = change.new.as_ref().or(change.old.as_ref());

    match row.and_then(|r| r.get(column)) {
        Some(serde_json::Value::String(s)) => s == expected,
        Some(serde_json::Value::Null) | None => false,
        Some(other) => other.to_string() == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{ChangeType, EventFilter};
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn open(hub: &LocalRealtimeHub, name: &str, spec: ChannelSpec) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.open_channel(name, &spec, tx).await.unwrap();
        rx
    }

    #[tokio::test]
    async fn test_open_confirms_subscription() {
        let hub = LocalRealtimeHub::new();
        let mut rx = open(&hub, "c1", ChannelSpec::new("classes")).await;

        assert_eq!(rx.recv().await, Some(ChannelEvent::Subscribed));
        assert_eq!(hub.channel_count(), 1);
        assert_eq!(hub.history(), vec![HubEvent::Opened("c1".to_string())]);
    }

    #[tokio::test]
    async fn test_open_fails_when_unavailable() {
        let hub = LocalRealtimeHub::new();
        hub.set_available(false);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = hub
            .open_channel("c1", &ChannelSpec::new("classes"), tx)
            .await
            .unwrap_err();
        assert_eq!(err.code.as_deref(), Some("08006"));
        assert_eq!(hub.open_attempts(), 1);
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_respects_table_and_event() {
        let hub = LocalRealtimeHub::new();
        let mut all = open(&hub, "all", ChannelSpec::new("invoices")).await;
        let mut inserts = open(
            &hub,
            "inserts",
            ChannelSpec {
                event: EventFilter::Only(ChangeType::Insert),
                ..ChannelSpec::new("invoices")
            },
        )
        .await;
        let _other = open(&hub, "other", ChannelSpec::new("coupons")).await;

        let update = ChangeEvent::update("invoices", json!({"id": 1}), json!({"id": 1, "paid": true}));
        assert_eq!(hub.publish("public", &update), 1);

        let insert = ChangeEvent::insert("invoices", json!({"id": 2}));
        assert_eq!(hub.publish("public", &insert), 2);
        assert_eq!(hub.publish("billing", &insert), 0);

        assert_eq!(all.recv().await, Some(ChannelEvent::Subscribed));
        assert_eq!(all.recv().await, Some(ChannelEvent::Change(update)));
        assert_eq!(inserts.recv().await, Some(ChannelEvent::Subscribed));
        assert_eq!(inserts.recv().await, Some(ChannelEvent::Change(insert)));
    }

    #[tokio::test]
    async fn test_row_filter() {
        let hub = LocalRealtimeHub::new();
        let _rx = open(
            &hub,
            "mine",
            ChannelSpec {
                filter: Some("student_id=eq.42".to_string()),
                ..ChannelSpec::new("wishlists")
            },
        )
        .await;

        let mine = ChangeEvent::insert("wishlists", json!({"student_id": 42}));
        let theirs = ChangeEvent::insert("wishlists", json!({"student_id": 7}));
        let deleted = ChangeEvent::delete("wishlists", json!({"student_id": 42}));

        assert_eq!(hub.publish("public", &mine), 1);
        assert_eq!(hub.publish("public", &theirs), 0);
        assert_eq!(hub.publish("public", &deleted), 1);
    }

    #[test]
    fn test_row_filter_unsupported_operator() {
        let change = ChangeEvent::insert("t", json!({"n": 5}));
        assert!(!row_filter_matches("n=gt.3", &change));
        assert!(row_filter_matches("n=eq.5", &change));
    }

    #[tokio::test]
    async fn test_failure_injection_and_remove() {
        let hub = LocalRealtimeHub::new();
        let mut rx = open(&hub, "c1", ChannelSpec::new("classes")).await;
        rx.recv().await;

        assert!(hub.fail_channel("c1", "socket closed"));
        assert_eq!(
            rx.recv().await,
            Some(ChannelEvent::ChannelError("socket closed".to_string()))
        );
        assert!(hub.time_out_channel("c1"));
        assert_eq!(rx.recv().await, Some(ChannelEvent::TimedOut));

        hub.remove_channel(&ChannelHandle { name: "c1".to_string() }).await;
        assert_eq!(rx.recv().await, Some(ChannelEvent::Closed));
        assert_eq!(rx.recv().await, None);
        assert!(!hub.fail_channel("c1", "gone"));
        assert_eq!(hub.opened_count("c1"), 1);
    }
}

//! Realtime Endpoint Port
//!
//! Defines the push/subscription contract with the backing service's
//! change feed. A channel is opened with a sink; the transport pushes
//! lifecycle events and change payloads into it until the channel is removed.

use crate::domain::entities::ChannelEvent;
use crate::domain::ports::ServiceError;
use crate::domain::value_objects::EventFilter;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Sink a transport pushes channel events into.
pub type ChannelSink = mpsc::UnboundedSender<ChannelEvent>;

/// What a channel listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Database schema, usually `public`
    pub schema: String,
    /// Table whose changes are streamed
    pub table: String,
    /// Change types of interest
    pub event: EventFilter,
    /// Optional row filter in the transport's syntax (e.g. `student_id=eq.42`)
    pub filter: Option<String>,
}

impl ChannelSpec {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: "public".to_string(),
            table: table.into(),
            event: EventFilter::All,
            filter: None,
        }
    }
}

/// Opaque handle to an open channel, used to remove it later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    /// Unique per open; reopening the same subscription yields a new name
    pub name: String,
}

/// Push/subscription access to the backing service.
#[async_trait]
pub trait RealtimeEndpoint: Send + Sync {
    /// Open a channel. The transport must eventually push `Subscribed`,
    /// `ChannelError` or `TimedOut` into `sink`.
    async fn open_channel(
        &self,
        name: &str,
        spec: &ChannelSpec,
        sink: ChannelSink,
    ) -> Result<ChannelHandle, ServiceError>;

    /// Close a channel and release its resources. Unknown handles are ignored.
    async fn remove_channel(&self, handle: &ChannelHandle);
}

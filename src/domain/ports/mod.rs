mod data_endpoint;
mod realtime_endpoint;
mod user_notifier;

pub use data_endpoint::{DataEndpoint, ServiceError};
pub use realtime_endpoint::{ChannelHandle, ChannelSink, ChannelSpec, RealtimeEndpoint};
pub use user_notifier::{NoticeSource, TerminalNotice, UserNotifier};

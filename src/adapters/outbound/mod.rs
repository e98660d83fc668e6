mod local_realtime_hub;
mod rest_data_endpoint;
mod tracing_notifier;

pub use local_realtime_hub::{HubEvent, LocalRealtimeHub};
pub use rest_data_endpoint::{RestDataEndpoint, RestEndpointConfig};
pub use tracing_notifier::TracingNotifier;

//! Infrastructure Layer
//!
//! Connection supervision and the listener registry it notifies through.

pub mod connection_monitor;
pub mod listeners;

pub use connection_monitor::{ConnectionMonitor, MonitorConfig, CONNECTION_LOST_MESSAGE};
pub use listeners::{ListenerHandle, ListenerId, ListenerRegistry};

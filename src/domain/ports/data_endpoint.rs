//! Data Endpoint Port
//!
//! Defines the request/response contract with the backing data service.
//! Implementations may speak REST, a native driver, or be in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Failure reported by the backing service (or the transport in front of it).
///
/// Mirrors the error body returned by PostgREST-style endpoints. `status` is
/// filled in by HTTP adapters and never read from the body itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    /// Machine-readable code (SQLSTATE, PGRST*, or transport-specific)
    #[serde(default)]
    pub code: Option<String>,
    /// HTTP status, when the failure came back as a response
    #[serde(skip)]
    pub status: Option<u16>,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Request/response access to the backing service.
///
/// The resilience layer only needs a health probe from this port; business
/// services issue their own calls through the concrete adapter and hand them
/// to the query executor as closures.
#[async_trait]
pub trait DataEndpoint: Send + Sync {
    /// Minimal read used solely to measure reachability.
    async fn probe(&self) -> Result<(), ServiceError>;
}

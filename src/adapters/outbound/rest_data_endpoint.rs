//! REST Data Endpoint
//!
//! Implements DataEndpoint over a PostgREST-style HTTP API. Besides the
//! health probe it exposes the handful of calls business services wrap in
//! the query executor: table reads, inserts and stored-procedure calls.

use crate::domain::ports::{DataEndpoint, ServiceError};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Connection settings for the REST endpoint.
#[derive(Debug, Clone)]
pub struct RestEndpointConfig {
    /// Project base URL, e.g. `https://abc.example.co`
    pub url: String,
    /// Public API key, sent both as `apikey` and as bearer token
    pub api_key: String,
    /// Table read by the health probe
    pub health_table: String,
    /// Upper bound for any single request
    pub request_timeout: Duration,
}

impl RestEndpointConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            health_table: "profiles".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_health_table(mut self, table: impl Into<String>) -> Self {
        self.health_table = table.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// PostgREST-style HTTP client.
pub struct RestDataEndpoint {
    config: RestEndpointConfig,
    client: reqwest::Client,
}

impl RestDataEndpoint {
    pub fn new(config: RestEndpointConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ServiceError::new(format!("failed to build http client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RestEndpointConfig {
        &self.config
    }

    /// `GET /rest/v1/{table}` with PostgREST query parameters
    /// (`select`, `limit`, `col=eq.value`, ...).
    pub async fn select<T>(&self, table: &str, query: &[(&str, &str)]) -> Result<Vec<T>, ServiceError>
    where
        T: DeserializeOwned,
    {
        let request = self.authorized(self.client.get(self.table_url(table))).query(query);
        let response = self.send(request).await?;
        decode(response).await
    }

    /// `POST /rest/v1/{table}`, returning the inserted rows.
    pub async fn insert<B, T>(&self, table: &str, rows: &B) -> Result<Vec<T>, ServiceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self
            .authorized(self.client.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(rows);
        let response = self.send(request).await?;
        decode(response).await
    }

    /// `POST /rest/v1/rpc/{function}` with named arguments.
    pub async fn rpc<T>(&self, function: &str, args: &serde_json::Value) -> Result<T, ServiceError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url(), function);
        let request = self.authorized(self.client.post(url)).json(args);
        let response = self.send(request).await?;
        decode(response).await
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url(), table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    /// Send and turn transport failures and non-2xx answers into
    /// `ServiceError`s.
    async fn send(&self, request: RequestBuilder) -> Result<Response, ServiceError> {
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = match serde_json::from_str::<ServiceError>(&body) {
            Ok(parsed) if !parsed.message.is_empty() || parsed.code.is_some() => parsed,
            _ if body.trim().is_empty() => ServiceError::new(
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            ),
            _ => ServiceError::new(body),
        };

        tracing::debug!(status = status.as_u16(), code = ?error.code, "request rejected: {}", error.message);
        Err(error.with_status(status.as_u16()))
    }
}

/// Transport failures carry no code or status; their message is what the
/// classifier keys on.
fn transport_error(error: reqwest::Error) -> ServiceError {
    if error.is_timeout() {
        ServiceError::new(format!("request timed out: {}", error))
    } else if error.is_connect() {
        ServiceError::new(format!("connection failed: {}", error))
    } else {
        ServiceError::new(format!("network request failed: {}", error))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
    let body = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&body)
        .map_err(|e| ServiceError::new(format!("invalid response body: {}", e)))
}

#[async_trait]
impl DataEndpoint for RestDataEndpoint {
    async fn probe(&self) -> Result<(), ServiceError> {
        let request = self
            .authorized(self.client.get(self.table_url(&self.config.health_table)))
            .query(&[("select", "count"), ("limit", "1")]);
        self.send(request).await.map(|_| ())
    }
}

//! Integration tests for the connection monitor and query executor against
//! a mock REST endpoint.

use datalink::adapters::outbound::{RestDataEndpoint, RestEndpointConfig};
use datalink::{
    CategorizedError, ConnectionMonitor, ConnectionStatus, ErrorCategory, MonitorConfig,
    QueryExecutor, QueryOptions, TerminalNotice, UserNotifier,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct Notices {
    errors: Mutex<Vec<CategorizedError>>,
    terminal: Mutex<Vec<TerminalNotice>>,
}

impl UserNotifier for Notices {
    fn notify_error(&self, error: &CategorizedError) {
        self.errors.lock().unwrap().push(error.clone());
    }

    fn notify_terminal(&self, notice: &TerminalNotice) {
        self.terminal.lock().unwrap().push(notice.clone());
    }
}

fn endpoint(server: &MockServer) -> Arc<RestDataEndpoint> {
    let config = RestEndpointConfig::new(server.uri(), "anon-key")
        .with_health_table("profiles")
        .with_request_timeout(Duration::from_millis(500));
    Arc::new(RestDataEndpoint::new(config).unwrap())
}

async fn mount_probe(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!([])))
        .mount(server)
        .await;
}

async fn wait_for(monitor: &ConnectionMonitor, status: ConnectionStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while monitor.status() != status {
        assert!(
            tokio::time::Instant::now() < deadline,
            "monitor stuck in {} waiting for {}",
            monitor.status(),
            status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Healthy endpoint: the monitor connects and records latency
#[tokio::test]
async fn test_monitor_connects_to_healthy_endpoint() {
    let server = MockServer::start().await;
    mount_probe(&server, 200).await;

    let monitor = ConnectionMonitor::new(
        endpoint(&server),
        Arc::new(Notices::default()),
        MonitorConfig::default(),
    );

    assert_eq!(monitor.initialize().await, ConnectionStatus::Connected);
    let last = monitor.last_health_check().unwrap();
    assert!(last.healthy);
    assert!(last.latency_ms.is_some());
    monitor.cleanup();
}

/// Outage detected by the periodic probe, then recovered by reconnection
#[tokio::test]
async fn test_monitor_detects_outage_and_recovers() {
    let server = MockServer::start().await;
    mount_probe(&server, 200).await;

    let notices = Arc::new(Notices::default());
    let monitor = ConnectionMonitor::new(
        endpoint(&server),
        notices.clone(),
        MonitorConfig::default()
            .with_health_check_interval(Duration::from_millis(100))
            .with_reconnect_delay(Duration::from_millis(100))
            .with_max_reconnect_attempts(50),
    );
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = transitions.clone();
    let _handle = monitor.on_status_change(move |change| seen.lock().unwrap().push(change.current));

    monitor.initialize().await;
    assert_eq!(monitor.status(), ConnectionStatus::Connected);

    server.reset().await;
    mount_probe(&server, 503).await;
    wait_for(&monitor, ConnectionStatus::Error).await;

    server.reset().await;
    mount_probe(&server, 200).await;
    wait_for(&monitor, ConnectionStatus::Connected).await;

    assert_eq!(monitor.reconnect_attempts(), 0);
    assert!(notices.terminal.lock().unwrap().is_empty());
    assert!(transitions.lock().unwrap().contains(&ConnectionStatus::Error));
    monitor.cleanup();
}

/// Two 503s then a success: the executor retries through them
#[tokio::test]
async fn test_executor_retries_through_unavailable_responses() {
    let server = MockServer::start().await;
    mount_probe(&server, 200).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/classes"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/classes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"id": 1}])))
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    let notices = Arc::new(Notices::default());
    let monitor = ConnectionMonitor::new(endpoint.clone(), notices.clone(), MonitorConfig::default());
    monitor.initialize().await;
    let executor = QueryExecutor::new(monitor.clone(), notices.clone());

    let result = executor
        .execute_query(
            || {
                let endpoint = endpoint.clone();
                async move { endpoint.select::<serde_json::Value>("classes", &[]).await }
            },
            QueryOptions::default().with_retry_delay(Duration::from_millis(10)),
        )
        .await;

    let rows = result.into_result().unwrap();
    assert_eq!(rows[0]["id"], 1);

    let class_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/rest/v1/classes")
        .count();
    assert_eq!(class_calls, 3);
    assert!(notices.errors.lock().unwrap().is_empty());
    monitor.cleanup();
}

/// Constraint violations are classified and surfaced once, without retry
#[tokio::test]
async fn test_executor_surfaces_validation_error() {
    let server = MockServer::start().await;
    mount_probe(&server, 200).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/wishlists"))
        .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint",
            "details": null,
            "hint": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    let notices = Arc::new(Notices::default());
    let monitor = ConnectionMonitor::new(endpoint.clone(), notices.clone(), MonitorConfig::default());
    monitor.initialize().await;
    let executor = QueryExecutor::new(monitor.clone(), notices.clone());

    let result = executor
        .execute_query(
            || {
                let endpoint = endpoint.clone();
                async move {
                    endpoint
                        .insert::<_, serde_json::Value>("wishlists", &serde_json::json!([{"class_id": 4}]))
                        .await
                }
            },
            QueryOptions::default().with_retry_delay(Duration::from_millis(10)),
        )
        .await;

    let error = result.error().unwrap();
    assert_eq!(error.category(), ErrorCategory::Validation);
    assert_eq!(error.original().code.as_deref(), Some("23505"));
    assert_eq!(notices.errors.lock().unwrap().len(), 1);
    monitor.cleanup();
}

/// Unreachable service: queries short-circuit without touching the network
#[tokio::test]
async fn test_executor_short_circuits_when_unreachable() {
    let config = RestEndpointConfig::new("http://127.0.0.1:1", "anon-key")
        .with_request_timeout(Duration::from_millis(200));
    let endpoint = Arc::new(RestDataEndpoint::new(config).unwrap());
    let notices = Arc::new(Notices::default());
    let monitor = ConnectionMonitor::new(
        endpoint.clone(),
        notices.clone(),
        MonitorConfig::default().with_auto_reconnect(false),
    );
    assert_eq!(monitor.initialize().await, ConnectionStatus::Error);

    let executor = QueryExecutor::new(monitor.clone(), notices.clone());
    let mut calls = 0;
    let result = executor
        .execute_silent_query(
            || {
                calls += 1;
                let endpoint = endpoint.clone();
                async move { endpoint.select::<serde_json::Value>("classes", &[]).await }
            },
            QueryOptions::default(),
        )
        .await;

    assert_eq!(calls, 0);
    assert_eq!(result.error().unwrap().category(), ErrorCategory::Network);
    assert!(notices.errors.lock().unwrap().is_empty());
    monitor.cleanup();
}

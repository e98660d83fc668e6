//! datalink diagnostics
//!
//! Composition root: wires the resilience layer against the configured
//! backing service, logs every connection transition and keeps running
//! until interrupted.

use datalink::adapters::outbound::{LocalRealtimeHub, RestDataEndpoint, TracingNotifier};
use datalink::domain::ports::UserNotifier;
use datalink::{Config, ConnectionMonitor, QueryExecutor, QueryOptions, SubscriptionManager};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(log_level).init();

    tracing::info!(url = %cfg.url, health_table = %cfg.health_table, "starting datalink");

    // ===== COMPOSITION ROOT =====
    let endpoint = Arc::new(RestDataEndpoint::new(cfg.endpoint())?);
    let notifier: Arc<dyn UserNotifier> = Arc::new(TracingNotifier::new());
    let realtime = Arc::new(LocalRealtimeHub::new());

    let monitor = ConnectionMonitor::new(endpoint.clone(), notifier.clone(), cfg.monitor());
    let _transitions = monitor.on_status_change(|change| {
        tracing::info!(from = %change.previous, to = %change.current, "connection status changed");
    });

    let executor = QueryExecutor::new(monitor.clone(), notifier.clone());
    let subscriptions = SubscriptionManager::new(realtime, notifier, &monitor);

    let status = monitor.initialize().await;
    tracing::info!(%status, "connection monitor initialized");

    let table = cfg.health_table.clone();
    let rows = executor
        .execute_query(
            || {
                let endpoint = endpoint.clone();
                let table = table.clone();
                async move {
                    endpoint
                        .select::<serde_json::Value>(&table, &[("select", "*"), ("limit", "1")])
                        .await
                }
            },
            QueryOptions::default().with_show_error_to_user(false),
        )
        .await;
    match rows.into_result() {
        Ok(rows) => tracing::info!(table = %cfg.health_table, rows = rows.len(), "sample read ok"),
        Err(e) => tracing::warn!(table = %cfg.health_table, "sample read failed: {}", e),
    }

    shutdown_signal().await;

    tracing::info!("shutting down");
    subscriptions.shutdown().await;
    monitor.cleanup();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;

use society_monitor::config::Settings;
use society_monitor::connection_manager::ConnectionManager;
use society_monitor::health::{HealthCollector, HostSampler};
use society_monitor::lifecycle::Lifecycle;
use society_monitor::server::{create_app, AppState};
use society_monitor::stats::StatsAggregator;
use society_monitor::storage::PostgresStore;
use society_monitor::tasks::BroadcastScheduler;
use society_monitor::telemetry::init_tracing;
use society_monitor::transport::ServerTransport;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Arc::new(Settings::new().context("Failed to load configuration")?);
    init_tracing(&settings.logging)?;
    tracing::info!("Configuration loaded");

    // Binding is the only startup step allowed to abort the process
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let store = Arc::new(PostgresStore::connect_lazy(&settings.database)?);
    tracing::info!(database = %store.database_url_masked(), "Database pool configured");

    let connection_manager = Arc::new(ConnectionManager::new());
    let health_collector = Arc::new(
        HealthCollector::new(store.clone(), Arc::new(HostSampler::new()), connection_manager.clone())
            .with_probe_timeout(settings.database.probe_timeout())
            .with_memory_high_water(settings.monitoring.memory_high_water_percent),
    );
    let stats_aggregator = Arc::new(StatsAggregator::new(store.clone(), connection_manager.clone()));
    let scheduler = BroadcastScheduler::new(
        connection_manager.clone(),
        health_collector.clone(),
        stats_aggregator.clone(),
        settings.monitoring.broadcast_interval(),
    );

    let transport = Arc::new(ServerTransport::new());
    let lifecycle = Lifecycle::startup(
        connection_manager.clone(),
        scheduler.clone(),
        transport.clone(),
        settings.shutdown.clone(),
    );

    let state = AppState::new(
        settings.clone(),
        connection_manager,
        health_collector,
        stats_aggregator,
        scheduler,
    );
    let app = create_app(state);

    let serve_transport = transport.clone();
    let mut server = tokio::spawn(async move {
        serve_transport.mark_serving();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(serve_transport.shutdown_signal())
            .await;
        serve_transport.mark_stopped();
        result
    });
    tracing::info!("Server listening on {}", addr);

    let reason = tokio::select! {
        reason = shutdown_signal() => reason,
        result = &mut server => {
            match result {
                Ok(Ok(())) => tracing::warn!("Server stopped unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "Server failed"),
                Err(e) => tracing::error!(error = %e, "Server task panicked"),
            }
            "server stopped"
        }
    };

    let report = lifecycle.shutdown(reason).await;
    store.close().await;

    if report.timed_out {
        tracing::error!("Shutdown timed out, forcing exit");
        std::process::exit(1);
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves with the name of the first termination signal received
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            "SIGINT"
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
            "SIGTERM"
        }
    }
}

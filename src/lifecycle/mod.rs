//! Ordered startup and graceful shutdown.
//!
//! Startup binds the connection manager to its transport, wires the
//! operator-connected observer to the scheduler and only then starts the
//! timer. Shutdown runs the reverse under a hard timeout:
//! 1. Stop the broadcast scheduler
//! 2. Close the transport and disconnect every connection
//! 3. Give in-flight broadcasts a bounded grace period

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::time::timeout;

use crate::config::ShutdownConfig;
use crate::connection_manager::ConnectionManager;
use crate::tasks::BroadcastScheduler;
use crate::transport::Transport;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of the shutdown sequence, shared by every caller of
/// [`Lifecycle::shutdown`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShutdownReport {
    pub reason: String,
    pub connections_closed: usize,
    pub in_flight_drained: bool,
    pub timed_out: bool,
    pub duration: Duration,
}

pub struct Lifecycle {
    manager: Arc<ConnectionManager>,
    scheduler: BroadcastScheduler,
    config: ShutdownConfig,
    report: OnceCell<ShutdownReport>,
}

impl Lifecycle {
    /// Bring the monitoring core up in dependency order
    pub fn startup(
        manager: Arc<ConnectionManager>,
        scheduler: BroadcastScheduler,
        transport: Arc<dyn Transport>,
        config: ShutdownConfig,
    ) -> Self {
        manager.initialize(transport);
        manager.set_operator_observer(scheduler.operator_observer());
        scheduler.start();

        tracing::info!(
            shutdown_timeout_secs = config.timeout_secs,
            grace_period_ms = config.grace_period_ms,
            "Monitoring core started"
        );

        Self {
            manager,
            scheduler,
            config,
            report: OnceCell::new(),
        }
    }

    /// Run the shutdown sequence once.
    ///
    /// Concurrent and repeated calls wait for the same sequence and receive
    /// its report; the reason of later callers is ignored.
    pub async fn shutdown(&self, reason: &str) -> ShutdownReport {
        self.report
            .get_or_init(|| self.run_shutdown(reason.to_string()))
            .await
            .clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.report.initialized()
    }

    #[tracing::instrument(name = "lifecycle.shutdown", skip(self))]
    async fn run_shutdown(&self, reason: String) -> ShutdownReport {
        let start = Instant::now();
        tracing::info!(
            reason = %reason,
            connections = self.manager.connection_count(),
            "Starting graceful shutdown"
        );

        let sequence = async {
            tracing::info!("Phase 1: Stopping broadcast scheduler");
            self.scheduler.stop();

            tracing::info!("Phase 2: Closing transport and connections");
            let connections_closed = match self.manager.shutdown().await {
                Ok(closed) => closed,
                Err(e) => {
                    tracing::error!(error = %e, operation = "connection_manager.shutdown", "Connection shutdown failed");
                    0
                }
            };

            tracing::info!("Phase 3: Draining in-flight broadcasts");
            let in_flight_drained = self.drain_in_flight().await;

            (connections_closed, in_flight_drained)
        };

        let mut report = ShutdownReport {
            reason,
            ..Default::default()
        };

        match timeout(self.config.timeout(), sequence).await {
            Ok((connections_closed, in_flight_drained)) => {
                report.connections_closed = connections_closed;
                report.in_flight_drained = in_flight_drained;
            }
            Err(_) => {
                report.timed_out = true;
                tracing::error!(
                    timeout_secs = self.config.timeout_secs,
                    "Shutdown did not complete in time"
                );
            }
        }

        report.duration = start.elapsed();
        tracing::info!(
            connections_closed = report.connections_closed,
            in_flight_drained = report.in_flight_drained,
            timed_out = report.timed_out,
            duration_ms = report.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        report
    }

    async fn drain_in_flight(&self) -> bool {
        if self.scheduler.in_flight() == 0 {
            return true;
        }

        tracing::info!(
            in_flight = self.scheduler.in_flight(),
            "Waiting for in-flight broadcasts"
        );

        let scheduler = &self.scheduler;
        let drain = async {
            while scheduler.in_flight() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        };

        match timeout(self.config.grace_period(), drain).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    in_flight = self.scheduler.in_flight(),
                    "Grace period elapsed with broadcasts still in flight"
                );
                false
            }
        }
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::timeout;

use crate::connection_manager::ConnectionManager;
use crate::metrics::HealthMetrics;
use crate::storage::{DatabaseProbe, ProbeError};

use super::{
    ConnectionCheck, DatabaseCheck, DependencyStatus, HealthChecks, HealthSnapshot, HealthStatus,
    MemoryCheck, SystemCheck, SystemSampler,
};

const BYTES_PER_MB: u64 = 1024 * 1024;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_MEMORY_HIGH_WATER_PERCENT: f64 = 90.0;

/// Produces health snapshots.
///
/// Holds no mutable state of its own; every call samples afresh. A failing
/// database probe is reported inside the snapshot, never as an error.
pub struct HealthCollector {
    probe: Arc<dyn DatabaseProbe>,
    sampler: Arc<dyn SystemSampler>,
    connections: Arc<ConnectionManager>,
    started_at: Instant,
    probe_timeout: Duration,
    memory_high_water_percent: f64,
}

impl HealthCollector {
    pub fn new(
        probe: Arc<dyn DatabaseProbe>,
        sampler: Arc<dyn SystemSampler>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            probe,
            sampler,
            connections,
            started_at: Instant::now(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            memory_high_water_percent: DEFAULT_MEMORY_HIGH_WATER_PERCENT,
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn with_memory_high_water(mut self, percent: f64) -> Self {
        self.memory_high_water_percent = percent;
        self
    }

    #[tracing::instrument(name = "health.collect", skip(self))]
    pub async fn collect(&self) -> HealthSnapshot {
        let database = self.check_database().await;
        let sample = self.sampler.sample();
        let usage_percent = sample.memory_usage_percent();

        let status =
            HealthStatus::derive(database.status, usage_percent, self.memory_high_water_percent);
        HealthMetrics::record_status(status);

        if !status.is_healthy() {
            tracing::warn!(
                status = status.as_str(),
                database = ?database.status,
                memory_percent = usage_percent,
                "Health check not healthy"
            );
        }

        HealthSnapshot {
            status,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            checks: HealthChecks {
                database,
                memory: MemoryCheck {
                    used_mb: sample.memory_used_bytes / BYTES_PER_MB,
                    total_mb: sample.memory_total_bytes / BYTES_PER_MB,
                    usage_percent: (usage_percent * 100.0).round() / 100.0,
                    process_rss_mb: sample.process_rss_bytes.map(|b| b / BYTES_PER_MB),
                },
                system: SystemCheck {
                    load_average: sample.load_average,
                    cpu_count: sample.cpu_count,
                },
                connections: ConnectionCheck {
                    total: self.connections.connection_count(),
                    operators: self.connections.operator_count(),
                },
            },
        }
    }

    async fn check_database(&self) -> DatabaseCheck {
        let start = Instant::now();
        let result = match timeout(self.probe_timeout, self.probe.ping()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::TimedOut(self.probe_timeout.as_millis() as u64)),
        };
        let latency_ms = start.elapsed().as_millis() as u64;
        HealthMetrics::record_probe_latency_ms(latency_ms);

        match result {
            Ok(()) => DatabaseCheck {
                status: DependencyStatus::Up,
                latency_ms,
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, latency_ms = latency_ms, "Database probe failed");
                DatabaseCheck {
                    status: DependencyStatus::Down,
                    latency_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ConnectionIdentity;
    use crate::health::SystemSample;
    use crate::transport::ServerTransport;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct FixedProbe(Result<(), &'static str>);

    #[async_trait]
    impl DatabaseProbe for FixedProbe {
        async fn ping(&self) -> Result<(), ProbeError> {
            self.0.map_err(|e| ProbeError::Failed(e.to_string()))
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl DatabaseProbe for HangingProbe {
        async fn ping(&self) -> Result<(), ProbeError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct FixedSampler(f64);

    impl SystemSampler for FixedSampler {
        fn sample(&self) -> SystemSample {
            SystemSample {
                memory_used_bytes: (self.0 * 10.0 * BYTES_PER_MB as f64) as u64,
                memory_total_bytes: 1000 * BYTES_PER_MB,
                process_rss_bytes: Some(64 * BYTES_PER_MB),
                load_average: [0.5, 0.4, 0.3],
                cpu_count: 4,
            }
        }
    }

    fn manager() -> Arc<ConnectionManager> {
        let manager = Arc::new(ConnectionManager::new());
        manager.initialize(Arc::new(ServerTransport::new()));
        manager
    }

    fn collector(probe: Arc<dyn DatabaseProbe>, memory_percent: f64) -> HealthCollector {
        HealthCollector::new(probe, Arc::new(FixedSampler(memory_percent)), manager())
            .with_memory_high_water(90.0)
    }

    #[tokio::test]
    async fn test_healthy_snapshot() {
        let snapshot = collector(Arc::new(FixedProbe(Ok(()))), 40.0).collect().await;

        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert_eq!(snapshot.checks.database.status, DependencyStatus::Up);
        assert!(snapshot.checks.database.error.is_none());
        assert_eq!(snapshot.checks.memory.total_mb, 1000);
        assert_eq!(snapshot.checks.memory.usage_percent, 40.0);
        assert_eq!(snapshot.checks.memory.process_rss_mb, Some(64));
        assert_eq!(snapshot.checks.system.cpu_count, 4);
    }

    #[tokio::test]
    async fn test_database_down_is_unhealthy() {
        let snapshot = collector(Arc::new(FixedProbe(Err("connection refused"))), 40.0)
            .collect()
            .await;

        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
        assert_eq!(snapshot.checks.database.status, DependencyStatus::Down);
        assert!(snapshot
            .checks
            .database
            .error
            .as_deref()
            .unwrap()
            .contains("connection refused"));

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["status"], "unhealthy");
        assert_eq!(value["checks"]["database"]["status"], "down");
    }

    #[tokio::test]
    async fn test_memory_pressure_is_degraded() {
        let snapshot = collector(Arc::new(FixedProbe(Ok(()))), 95.0).collect().await;
        assert_eq!(snapshot.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_database_down_wins_over_memory_pressure() {
        let snapshot = collector(Arc::new(FixedProbe(Err("boom"))), 95.0).collect().await;
        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_is_reported_as_down() {
        let snapshot = collector(Arc::new(HangingProbe), 10.0)
            .with_probe_timeout(Duration::from_millis(250))
            .collect()
            .await;

        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
        assert!(snapshot.checks.database.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_connection_counts() {
        let manager = manager();
        let (tx, _rx) = mpsc::channel(4);
        manager.on_connect(ConnectionIdentity::operator("op"), tx.clone()).unwrap();
        manager.on_connect(ConnectionIdentity::anonymous(), tx).unwrap();

        let snapshot = HealthCollector::new(
            Arc::new(FixedProbe(Ok(()))),
            Arc::new(FixedSampler(10.0)),
            manager,
        )
        .collect()
        .await;

        assert_eq!(snapshot.checks.connections.total, 2);
        assert_eq!(snapshot.checks.connections.operators, 1);
    }
}

//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::auth::AuthTier;
use crate::connection_manager::{ConnectionStats, OPERATOR_ROOM};
use crate::health::HealthStatus;
use crate::websocket::Topic;

use super::{
    BROADCASTS_TOTAL, BROADCAST_DELIVERIES_TOTAL, BROADCAST_FAILURES_TOTAL,
    CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL,
    DATABASE_PROBE_LATENCY, HEALTH_STATUS, OPERATOR_ROOM_MEMBERS, ROOMS_ACTIVE,
    ROOM_JOINS_DENIED_TOTAL, SCHEDULER_TICKS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for connection registry metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened(tier: AuthTier) {
        let label = match tier {
            AuthTier::Operator => "operator",
            AuthTier::Unprivileged => "unprivileged",
        };
        CONNECTIONS_OPENED_TOTAL.with_label_values(&[label]).inc();
    }

    pub fn record_closed() {
        CONNECTIONS_CLOSED_TOTAL.inc();
    }

    pub fn record_join_denied() {
        ROOM_JOINS_DENIED_TOTAL.inc();
    }

    /// Refresh gauges from a registry snapshot
    pub fn update_gauges(stats: &ConnectionStats) {
        CONNECTIONS_ACTIVE.set(stats.total_connections as i64);
        ROOMS_ACTIVE.set(stats.rooms.len() as i64);
        OPERATOR_ROOM_MEMBERS.set(stats.rooms.get(OPERATOR_ROOM).copied().unwrap_or(0) as i64);
    }
}

/// Helper struct for broadcast metrics
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    pub fn record(topic: Topic, delivered: usize, failed: usize) {
        BROADCASTS_TOTAL.with_label_values(&[topic.as_str()]).inc();
        BROADCAST_DELIVERIES_TOTAL.inc_by(delivered as u64);
        if failed > 0 {
            BROADCAST_FAILURES_TOTAL.inc_by(failed as u64);
        }
    }
}

/// Helper struct for scheduler metrics
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    pub fn record_broadcast() {
        SCHEDULER_TICKS_TOTAL.with_label_values(&["broadcast"]).inc();
    }

    pub fn record_skipped() {
        SCHEDULER_TICKS_TOTAL.with_label_values(&["skipped"]).inc();
    }

    pub fn record_failed() {
        SCHEDULER_TICKS_TOTAL.with_label_values(&["failed"]).inc();
    }
}

/// Helper struct for health metrics
pub struct HealthMetrics;

impl HealthMetrics {
    pub fn record_status(status: HealthStatus) {
        let value = match status {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        };
        HEALTH_STATUS.set(value);
    }

    pub fn record_probe_latency_ms(latency_ms: u64) {
        DATABASE_PROBE_LATENCY.observe(latency_ms as f64 / 1000.0);
    }
}

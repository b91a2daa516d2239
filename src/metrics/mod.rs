//! Prometheus metrics for the monitoring service.
//!
//! - Connection metrics (live connections, operator room size, rooms)
//! - Broadcast metrics (events by topic, deliveries, drops)
//! - Scheduler tick outcomes
//! - Health status and database probe latency

mod helpers;

pub use helpers::{
    encode_metrics, BroadcastMetrics, ConnectionMetrics, HealthMetrics, SchedulerMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "society_monitor";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Live connections in the registry
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of live connections"
    ).unwrap();

    /// Members of the global operator room
    pub static ref OPERATOR_ROOM_MEMBERS: IntGauge = register_int_gauge!(
        format!("{}_operator_room_members", METRIC_PREFIX),
        "Number of connections in the operator room"
    ).unwrap();

    /// Rooms with at least one member
    pub static ref ROOMS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_rooms_active", METRIC_PREFIX),
        "Number of rooms with at least one member"
    ).unwrap();

    /// Connections opened by authorization tier
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total connections opened",
        &["tier"]
    ).unwrap();

    /// Connections closed
    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total connections closed"
    ).unwrap();

    /// Room joins refused by the admission rule
    pub static ref ROOM_JOINS_DENIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_room_joins_denied_total", METRIC_PREFIX),
        "Total room joins refused for lack of authorization"
    ).unwrap();

    // ============================================================================
    // Broadcast Metrics
    // ============================================================================

    /// Broadcast events by topic
    pub static ref BROADCASTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcasts_total", METRIC_PREFIX),
        "Total broadcast events sent to non-empty rooms",
        &["topic"]
    ).unwrap();

    /// Per-connection deliveries
    pub static ref BROADCAST_DELIVERIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broadcast_deliveries_total", METRIC_PREFIX),
        "Total events queued to connections"
    ).unwrap();

    /// Per-connection drops (queue full or closed)
    pub static ref BROADCAST_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broadcast_failures_total", METRIC_PREFIX),
        "Total events dropped for a connection"
    ).unwrap();

    // ============================================================================
    // Scheduler Metrics
    // ============================================================================

    /// Scheduler ticks by outcome (broadcast, skipped, failed)
    pub static ref SCHEDULER_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_scheduler_ticks_total", METRIC_PREFIX),
        "Total scheduler ticks by outcome",
        &["outcome"]
    ).unwrap();

    // ============================================================================
    // Health Metrics
    // ============================================================================

    /// Last computed health status (0=healthy, 1=degraded, 2=unhealthy)
    pub static ref HEALTH_STATUS: IntGauge = register_int_gauge!(
        format!("{}_health_status", METRIC_PREFIX),
        "Last computed health status (0=healthy, 1=degraded, 2=unhealthy)"
    ).unwrap();

    /// Database liveness probe round trip
    pub static ref DATABASE_PROBE_LATENCY: Histogram = register_histogram!(
        format!("{}_database_probe_latency_seconds", METRIC_PREFIX),
        "Database liveness probe latency in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    ).unwrap();
}

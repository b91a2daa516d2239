//! Health snapshot value types

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Fixed precedence: database down, then memory pressure, then healthy
    pub fn derive(database: DependencyStatus, memory_percent: f64, high_water_percent: f64) -> Self {
        if database == DependencyStatus::Down {
            HealthStatus::Unhealthy
        } else if memory_percent > high_water_percent {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseCheck {
    pub status: DependencyStatus,
    /// Round trip in milliseconds, present even when the probe failed
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryCheck {
    pub used_mb: u64,
    pub total_mb: u64,
    pub usage_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_rss_mb: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemCheck {
    /// 1, 5 and 15 minute load averages
    pub load_average: [f64; 3],
    pub cpu_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub total: usize,
    pub operators: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthChecks {
    pub database: DatabaseCheck,
    pub memory: MemoryCheck,
    pub system: SystemCheck,
    pub connections: ConnectionCheck,
}

/// Immutable point-in-time health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
}

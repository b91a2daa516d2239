//! Aggregate statistics snapshots

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::Role;
use crate::connection_manager::ConnectionManager;
use crate::error::AppError;
use crate::storage::DomainCounters;

#[derive(Debug, Clone, Serialize)]
pub struct LiveConnectionCounts {
    pub total: usize,
    pub operators: usize,
    pub anonymous: usize,
}

/// Immutable point-in-time statistics
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub tenants: u64,
    pub operators: u64,
    pub roles: usize,
    pub connections: LiveConnectionCounts,
}

/// Produces [`StatsSnapshot`]s from the domain counters and the live registry
pub struct StatsAggregator {
    counters: Arc<dyn DomainCounters>,
    connections: Arc<ConnectionManager>,
}

impl StatsAggregator {
    pub fn new(counters: Arc<dyn DomainCounters>, connections: Arc<ConnectionManager>) -> Self {
        Self {
            counters,
            connections,
        }
    }

    #[tracing::instrument(name = "stats.aggregate", skip(self))]
    pub async fn aggregate(&self) -> Result<StatsSnapshot, AppError> {
        let (tenants, operators) = tokio::try_join!(
            self.counters.count_tenants(),
            self.counters.count_operators()
        )?;

        let live = self.connections.stats();

        Ok(StatsSnapshot {
            timestamp: Utc::now(),
            tenants,
            operators,
            roles: Role::COUNT,
            connections: LiveConnectionCounts {
                total: live.total_connections,
                operators: live.operator_connections,
                anonymous: live.anonymous_connections,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ConnectionIdentity;
    use crate::transport::ServerTransport;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct FixedCounters {
        tenants: u64,
        operators: Option<u64>,
    }

    #[async_trait]
    impl DomainCounters for FixedCounters {
        async fn count_tenants(&self) -> Result<u64, AppError> {
            Ok(self.tenants)
        }

        async fn count_operators(&self) -> Result<u64, AppError> {
            self.operators
                .ok_or_else(|| AppError::Internal("admins table unavailable".to_string()))
        }
    }

    fn manager() -> Arc<ConnectionManager> {
        let manager = Arc::new(ConnectionManager::new());
        manager.initialize(Arc::new(ServerTransport::new()));
        manager
    }

    #[tokio::test]
    async fn test_aggregate_counts() {
        let manager = manager();
        let (tx, _rx) = mpsc::channel(4);
        manager.on_connect(ConnectionIdentity::operator("op"), tx.clone()).unwrap();
        manager
            .on_connect(ConnectionIdentity::tenant_member("u", "s1"), tx.clone())
            .unwrap();
        manager.on_connect(ConnectionIdentity::anonymous(), tx).unwrap();

        let aggregator = StatsAggregator::new(
            Arc::new(FixedCounters {
                tenants: 12,
                operators: Some(3),
            }),
            manager,
        );

        let snapshot = aggregator.aggregate().await.unwrap();
        assert_eq!(snapshot.tenants, 12);
        assert_eq!(snapshot.operators, 3);
        assert_eq!(snapshot.roles, 4);
        assert_eq!(snapshot.connections.total, 3);
        assert_eq!(snapshot.connections.operators, 1);
        assert_eq!(snapshot.connections.anonymous, 1);
    }

    #[tokio::test]
    async fn test_counter_failure_propagates() {
        let aggregator = StatsAggregator::new(
            Arc::new(FixedCounters {
                tenants: 1,
                operators: None,
            }),
            manager(),
        );

        assert!(aggregator.aggregate().await.is_err());
    }
}

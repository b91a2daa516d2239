//! Persistence collaborators used by the health and stats producers.
//!
//! Only two narrow capabilities are consumed: a liveness probe and a pair
//! of aggregate counters. Both are traits so producers can run against
//! Postgres in production and fakes in tests.

mod postgres;

pub use postgres::PostgresStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::AppError;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Database probe failed: {0}")]
    Failed(String),

    #[error("Database probe timed out after {0} ms")]
    TimedOut(u64),
}

impl From<sqlx::Error> for ProbeError {
    fn from(e: sqlx::Error) -> Self {
        ProbeError::Failed(e.to_string())
    }
}

/// Round-trip liveness check against the persistence dependency
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn ping(&self) -> Result<(), ProbeError>;
}

/// Aggregate domain counts
#[async_trait]
pub trait DomainCounters: Send + Sync {
    /// Number of tenants (societies)
    async fn count_tenants(&self) -> Result<u64, AppError>;

    /// Number of operator accounts
    async fn count_operators(&self) -> Result<u64, AppError>;
}

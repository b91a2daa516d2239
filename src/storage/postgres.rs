//! PostgreSQL-backed probe and counters.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::error::AppError;

use super::{DatabaseProbe, DomainCounters, ProbeError};

const PING_QUERY: &str = "SELECT 1";
const COUNT_TENANTS_QUERY: &str = "SELECT COUNT(*) FROM societies";
const COUNT_OPERATORS_QUERY: &str = "SELECT COUNT(*) FROM admins";

pub struct PostgresStore {
    pool: PgPool,
    database_url: String,
}

impl PostgresStore {
    /// Build a lazily connecting pool.
    ///
    /// No connection is opened here, so an unreachable database at boot shows
    /// up as an unhealthy probe instead of a startup failure.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_lazy(&config.url)?;

        let store = Self {
            pool,
            database_url: config.url.clone(),
        };

        tracing::info!(
            url = %store.database_url_masked(),
            max_connections = config.max_connections,
            "PostgreSQL pool configured"
        );

        Ok(store)
    }

    /// Get the database URL (masked for logging).
    pub fn database_url_masked(&self) -> String {
        mask_url(&self.database_url)
    }

    /// Close the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL connection pool closed");
    }

    async fn count(&self, query: &str) -> Result<u64, AppError> {
        let count: i64 = sqlx::query_scalar(query).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl DatabaseProbe for PostgresStore {
    async fn ping(&self) -> Result<(), ProbeError> {
        sqlx::query(PING_QUERY).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl DomainCounters for PostgresStore {
    async fn count_tenants(&self) -> Result<u64, AppError> {
        self.count(COUNT_TENANTS_QUERY).await
    }

    async fn count_operators(&self) -> Result<u64, AppError> {
        self.count(COUNT_OPERATORS_QUERY).await
    }
}

fn mask_url(url: &str) -> String {
    // Mask password in URL for safe logging
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // `postgres://host@...` has no password: the colon belongs to the scheme
            if url[colon_pos..].starts_with("://") {
                return url.to_string();
            }
            let prefix = &url[..colon_pos + 1];
            let suffix = &url[at_pos..];
            return format!("{}***{}", prefix, suffix);
        }
    }
    url.to_string()
}

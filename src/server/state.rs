use std::sync::Arc;

use crate::auth::JwtValidator;
use crate::config::Settings;
use crate::connection_manager::ConnectionManager;
use crate::health::HealthCollector;
use crate::stats::StatsAggregator;
use crate::tasks::BroadcastScheduler;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub connection_manager: Arc<ConnectionManager>,
    pub health_collector: Arc<HealthCollector>,
    pub stats_aggregator: Arc<StatsAggregator>,
    pub scheduler: BroadcastScheduler,
}

impl AppState {
    /// Assemble request state around the already constructed monitoring core
    pub fn new(
        settings: Arc<Settings>,
        connection_manager: Arc<ConnectionManager>,
        health_collector: Arc<HealthCollector>,
        stats_aggregator: Arc<StatsAggregator>,
        scheduler: BroadcastScheduler,
    ) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));

        Self {
            settings,
            jwt_validator,
            connection_manager,
            health_collector,
            stats_aggregator,
            scheduler,
        }
    }
}

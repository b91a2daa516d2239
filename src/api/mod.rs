//! API layer - HTTP endpoint handlers.

mod health;
mod metrics;
mod routes;
mod system;

pub use health::health;
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
pub use system::{
    system_notification, system_stats, NotificationLevel, SystemNotificationRequest,
    SystemNotificationResponse, SystemStatsResponse,
};

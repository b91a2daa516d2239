//! Operator-facing system endpoints.

use std::collections::HashMap;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection_manager::{Room, OPERATOR_ROOM};
use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::stats::StatsSnapshot;
use crate::tasks::SchedulerStats;
use crate::websocket::Topic;

const MAX_TITLE_LEN: usize = 200;

#[derive(Debug, Serialize)]
pub struct SystemStatsResponse {
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    /// Member count per non-empty room
    pub rooms: HashMap<String, usize>,
    pub scheduler: SchedulerStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Deserialize)]
pub struct SystemNotificationRequest {
    /// Target room; defaults to the operator room
    #[serde(default)]
    pub room: Option<String>,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub level: NotificationLevel,
}

#[derive(Debug, Serialize)]
struct SystemNotificationPayload<'a> {
    title: &'a str,
    message: &'a str,
    level: NotificationLevel,
}

#[derive(Debug, Serialize)]
pub struct SystemNotificationResponse {
    pub room: String,
    pub delivered: usize,
    pub failed: usize,
    pub timestamp: DateTime<Utc>,
}

/// GET /api/v1/system/stats
pub async fn system_stats(State(state): State<AppState>) -> Result<Json<SystemStatsResponse>> {
    let stats = state.stats_aggregator.aggregate().await?;

    Ok(Json(SystemStatsResponse {
        stats,
        rooms: state.connection_manager.stats().rooms,
        scheduler: state.scheduler.stats(),
    }))
}

/// POST /api/v1/system/notifications
#[tracing::instrument(
    name = "http.system_notification",
    skip(state, request),
    fields(room = ?request.room, level = ?request.level)
)]
pub async fn system_notification(
    State(state): State<AppState>,
    Json(request): Json<SystemNotificationRequest>,
) -> Result<Json<SystemNotificationResponse>> {
    let room_name = request.room.as_deref().unwrap_or(OPERATOR_ROOM);
    let room = Room::parse(room_name)
        .ok_or_else(|| AppError::Validation(format!("Invalid room: {}", room_name)))?;

    let title = request.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Title must not be empty".to_string()));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(AppError::Validation(format!(
            "Title exceeds {} characters",
            MAX_TITLE_LEN
        )));
    }

    let payload = SystemNotificationPayload {
        title,
        message: &request.message,
        level: request.level,
    };
    let outcome = state
        .connection_manager
        .broadcast(&room, Topic::Notification, &payload)?;

    tracing::info!(
        room = %room,
        delivered = outcome.delivered,
        failed = outcome.failed,
        "System notification published"
    );

    Ok(Json(SystemNotificationResponse {
        room: room.name(),
        delivered: outcome.delivered,
        failed: outcome.failed,
        timestamp: Utc::now(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_request_defaults() {
        let request: SystemNotificationRequest =
            serde_json::from_str(r#"{"title":"Maintenance"}"#).unwrap();

        assert_eq!(request.room, None);
        assert_eq!(request.level, NotificationLevel::Info);
        assert!(request.message.is_empty());
    }

    #[test]
    fn test_notification_level_parsing() {
        let request: SystemNotificationRequest = serde_json::from_str(
            r#"{"room":"tenant:s1","title":"t","message":"m","level":"critical"}"#,
        )
        .unwrap();

        assert_eq!(request.room.as_deref(), Some("tenant:s1"));
        assert_eq!(request.level, NotificationLevel::Critical);
        assert!(serde_json::from_str::<SystemNotificationRequest>(r#"{"title":"t","level":"loud"}"#).is_err());
    }
}

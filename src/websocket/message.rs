use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broadcast topics delivered to rooms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "health:update")]
    HealthUpdate,
    #[serde(rename = "system:stats:update")]
    StatsUpdate,
    #[serde(rename = "system:notification")]
    Notification,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::HealthUpdate => "health:update",
            Topic::StatsUpdate => "system:stats:update",
            Topic::Notification => "system:notification",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomList {
    pub rooms: Vec<String>,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe(RoomList),
    Unsubscribe(RoomList),
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "event")]
    Event {
        topic: Topic,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "subscribed")]
    Subscribed { rooms: Vec<String> },
    #[serde(rename = "unsubscribed")]
    Unsubscribed { rooms: Vec<String> },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn event(topic: Topic, payload: serde_json::Value) -> Self {
        Self::Event {
            topic,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn subscribed(rooms: Vec<String>) -> Self {
        Self::Subscribed { rooms }
    }

    pub fn unsubscribed(rooms: Vec<String>) -> Self {
        Self::Unsubscribed { rooms }
    }
}

/// Message queued for a connection's writer task.
///
/// Broadcasts serialize once and share the encoded text between members.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Raw(ServerMessage),
    PreSerialized(Arc<str>),
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            OutboundMessage::Raw(msg) => serde_json::to_string(msg),
            OutboundMessage::PreSerialized(text) => Ok(text.to_string()),
        }
    }

    pub fn preserialize(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::PreSerialized(Arc::from(serde_json::to_string(message)?)))
    }
}

impl From<ServerMessage> for OutboundMessage {
    fn from(message: ServerMessage) -> Self {
        OutboundMessage::Raw(message)
    }
}

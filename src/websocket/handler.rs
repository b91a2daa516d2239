use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::ConnectionIdentity;
use crate::connection_manager::{ConnectionHandle, ConnectionManager, Room};
use crate::server::AppState;

use super::message::{ClientMessage, OutboundMessage, ServerMessage};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The handshake never fails on credentials: a missing or invalid token
/// yields an anonymous connection that cannot join any room.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let token = extract_token(&query, &headers);
    let identity = state.jwt_validator.identify(token.as_deref());

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, identity),
    fields(subject_id = ?identity.subject_id, tier = ?identity.tier)
)]
async fn handle_socket(socket: WebSocket, state: AppState, identity: ConnectionIdentity) {
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.settings.websocket.channel_buffer);

    let handle = match state.connection_manager.on_connect(identity, tx) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "Connection rejected");
            let (mut ws_sender, _) = socket.split();
            let _ = ws_sender.close().await;
            return;
        }
    };
    let connection_id = handle.id;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &handle_clone).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    let closed = handle.closed();
    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
        _ = closed => {
            tracing::debug!(connection_id = %connection_id, "Connection closed by server");
        }
    }
    send_task.abort();
    recv_task.abort();

    match state.connection_manager.on_disconnect(connection_id) {
        Ok(_) => {}
        Err(e) => tracing::error!(connection_id = %connection_id, error = %e, "Disconnect failed"),
    }

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = (chrono::Utc::now() - handle.connected_at).num_seconds(),
        "WebSocket connection closed"
    );
}

/// Returns false if the connection should be closed
async fn process_message(msg: Message, state: &AppState, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(connection_id = %handle.id, error = %e, "Failed to parse client message");
                    let _ = handle
                        .send(ServerMessage::error("INVALID_MESSAGE", e.to_string()))
                        .await;
                    return true;
                }
            };

            handle_client_message(client_msg, state, handle).await;
            true
        }
        Message::Binary(_) => {
            let _ = handle
                .send(ServerMessage::error(
                    "UNSUPPORTED_FORMAT",
                    "Binary messages are not supported",
                ))
                .await;
            true
        }
        // Axum answers pings itself
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

#[tracing::instrument(
    name = "ws.message",
    skip(state, handle),
    fields(connection_id = %handle.id)
)]
async fn handle_client_message(msg: ClientMessage, state: &AppState, handle: &Arc<ConnectionHandle>) {
    let reply = match msg {
        ClientMessage::Subscribe(list) => {
            ServerMessage::subscribed(subscribe(&list.rooms, &state.connection_manager, handle))
        }
        ClientMessage::Unsubscribe(list) => {
            ServerMessage::unsubscribed(unsubscribe(&list.rooms, &state.connection_manager, handle))
        }
        ClientMessage::Ping => ServerMessage::Pong,
    };

    let _ = handle.send(reply).await;
}

/// Join each requested room. Malformed or unauthorized names are dropped
/// from the reply without an error.
fn subscribe(rooms: &[String], manager: &ConnectionManager, handle: &ConnectionHandle) -> Vec<String> {
    let mut joined = Vec::new();

    for name in rooms {
        let Some(room) = Room::parse(name) else {
            tracing::debug!(connection_id = %handle.id, room = %name, "Ignoring malformed room name");
            continue;
        };

        match manager.join_room(handle.id, &room) {
            Ok(true) => joined.push(room.name()),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(connection_id = %handle.id, room = %room, error = %e, "Join failed");
            }
        }
    }

    joined
}

/// Leave each named room. Only rooms actually left are reported.
fn unsubscribe(rooms: &[String], manager: &ConnectionManager, handle: &ConnectionHandle) -> Vec<String> {
    let mut left = Vec::new();

    for room in rooms.iter().filter_map(|name| Room::parse(name)) {
        match manager.leave_room(handle.id, &room) {
            Ok(true) => left.push(room.name()),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(connection_id = %handle.id, room = %room, error = %e, "Leave failed");
            }
        }
    }

    left
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ServerTransport;
    use axum::http::HeaderValue;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn manager_with(identity: ConnectionIdentity) -> (ConnectionManager, Arc<ConnectionHandle>) {
        let manager = ConnectionManager::new();
        manager.initialize(Arc::new(ServerTransport::new()));
        let (tx, _rx) = mpsc::channel(8);
        let handle = manager.on_connect(identity, tx).unwrap();
        (manager, handle)
    }

    #[test]
    fn test_extract_token_prefers_query() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        let query = WsQuery {
            token: Some("from-query".to_string()),
        };
        assert_eq!(extract_token(&query, &headers).as_deref(), Some("from-query"));

        let query = WsQuery { token: None };
        assert_eq!(extract_token(&query, &headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn test_extract_token_ignores_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));

        assert_eq!(extract_token(&WsQuery { token: None }, &headers), None);
        assert_eq!(extract_token(&WsQuery { token: None }, &HeaderMap::new()), None);
    }

    #[test]
    fn test_subscribe_reports_only_admitted_rooms() {
        let (manager, handle) = manager_with(ConnectionIdentity::tenant_member("u1", "s1"));

        let requested = names(&["tenant:s1", "tenant:s2", "operators", "bogus", "tenant:"]);
        assert_eq!(subscribe(&requested, &manager, &handle), names(&["tenant:s1"]));

        assert!(manager.is_member(handle.id, &Room::tenant("s1")));
        assert!(!manager.is_member(handle.id, &Room::tenant("s2")));
        assert!(!manager.is_member(handle.id, &Room::Operators));
    }

    #[test]
    fn test_operator_subscribes_to_any_tenant() {
        let (manager, handle) = manager_with(ConnectionIdentity::operator("op"));

        let requested = names(&["tenant:s1", "tenant:s2", "not a room"]);
        assert_eq!(
            subscribe(&requested, &manager, &handle),
            names(&["tenant:s1", "tenant:s2"])
        );
    }

    #[test]
    fn test_anonymous_subscribes_to_nothing() {
        let (manager, handle) = manager_with(ConnectionIdentity::anonymous());

        let requested = names(&["operators", "tenant:s1"]);
        assert!(subscribe(&requested, &manager, &handle).is_empty());
        assert!(manager.rooms_of(handle.id).is_empty());
    }

    #[test]
    fn test_unsubscribe_reports_only_rooms_left() {
        let (manager, handle) = manager_with(ConnectionIdentity::tenant_member("u1", "s1"));
        subscribe(&names(&["tenant:s1"]), &manager, &handle);

        let requested = names(&["tenant:s1", "tenant:s9", "junk"]);
        assert_eq!(unsubscribe(&requested, &manager, &handle), names(&["tenant:s1"]));
        assert!(!manager.is_member(handle.id, &Room::tenant("s1")));

        // Leaving again is a no-op
        assert!(unsubscribe(&requested, &manager, &handle).is_empty());
    }
}

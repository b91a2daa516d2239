//! Live connection registry and room membership.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::ConnectionIdentity;
use crate::metrics::{BroadcastMetrics, ConnectionMetrics};
use crate::transport::Transport;
use crate::websocket::{OutboundMessage, ServerMessage, Topic};

use super::{
    BroadcastOutcome, ConnectionHandle, ConnectionManagerError, ConnectionStats,
    OperatorConnectObserver, Room,
};

type Result<T> = std::result::Result<T, ConnectionManagerError>;

/// Sole owner of the live-connection registry.
///
/// Constructed once at startup and shared by reference. Every addressing
/// method fails with [`ConnectionManagerError::NotInitialized`] until
/// [`ConnectionManager::initialize`] has bound a transport.
pub struct ConnectionManager {
    transport: OnceLock<Arc<dyn Transport>>,
    operator_observer: OnceLock<Arc<dyn OperatorConnectObserver>>,
    closing: AtomicBool,
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// room -> Set<connection_id>; rooms without members have no entry
    rooms: DashMap<Room, HashSet<Uuid>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            transport: OnceLock::new(),
            operator_observer: OnceLock::new(),
            closing: AtomicBool::new(false),
            connections: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Bind the manager to its transport. Only the first call binds; later
    /// calls keep the existing binding and return `false`.
    pub fn initialize(&self, transport: Arc<dyn Transport>) -> bool {
        let mut bound = false;
        self.transport.get_or_init(|| {
            bound = true;
            transport
        });

        if bound {
            tracing::info!("Connection manager initialized");
        } else {
            tracing::debug!("Connection manager already initialized, keeping existing transport");
        }
        bound
    }

    pub fn is_initialized(&self) -> bool {
        self.transport.get().is_some()
    }

    /// Register the operator-connected observer. Only one may be registered.
    pub fn set_operator_observer(&self, observer: Arc<dyn OperatorConnectObserver>) -> bool {
        let registered = self.operator_observer.set(observer).is_ok();
        if !registered {
            tracing::warn!("Operator observer already registered, ignoring");
        }
        registered
    }

    fn transport(&self) -> Result<&Arc<dyn Transport>> {
        self.transport.get().ok_or(ConnectionManagerError::NotInitialized)
    }

    /// Register a connection whose handshake has completed.
    ///
    /// Operators are joined to the operator room immediately and the
    /// registered observer is notified before this returns.
    pub fn on_connect(
        &self,
        identity: ConnectionIdentity,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Result<Arc<ConnectionHandle>> {
        self.transport()?;
        if self.closing.load(Ordering::Acquire) {
            return Err(ConnectionManagerError::ShuttingDown);
        }

        let handle = Arc::new(ConnectionHandle::new(identity, sender));
        let conn_id = handle.id;
        self.connections.insert(conn_id, handle.clone());

        // Shutdown may have taken its snapshot between the check and the insert
        if self.closing.load(Ordering::Acquire) {
            self.connections.remove(&conn_id);
            handle.close();
            return Err(ConnectionManagerError::ShuttingDown);
        }
        ConnectionMetrics::record_opened(handle.tier());

        tracing::info!(
            connection_id = %conn_id,
            subject_id = ?handle.subject_id(),
            tier = ?handle.tier(),
            tenant_id = ?handle.tenant_id(),
            "Connection registered"
        );

        if handle.is_operator() {
            self.rooms.entry(Room::Operators).or_default().insert(conn_id);

            if let Some(observer) = self.operator_observer.get() {
                observer.on_operator_connected(&handle);
            }
        }

        Ok(handle)
    }

    /// Remove a connection from the registry, then from every room.
    ///
    /// Returns `false` if the connection was not registered.
    pub fn on_disconnect(&self, connection_id: Uuid) -> Result<bool> {
        self.transport()?;
        Ok(self.remove_connection(connection_id).is_some())
    }

    fn remove_connection(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        // Registry first: readers filter room members by registry presence, and
        // a racing join_room re-checks the registry after inserting
        let removed = self.connections.remove(&connection_id);

        for mut entry in self.rooms.iter_mut() {
            entry.value_mut().remove(&connection_id);
        }
        self.rooms.retain(|_, members| !members.is_empty());

        let (_, handle) = removed?;
        ConnectionMetrics::record_closed();

        tracing::info!(
            connection_id = %connection_id,
            subject_id = ?handle.subject_id(),
            "Connection unregistered"
        );

        Some(handle)
    }

    /// Join a room. Unauthorized or unknown connections are silently refused.
    ///
    /// Returns whether the connection is now a member.
    pub fn join_room(&self, connection_id: Uuid, room: &Room) -> Result<bool> {
        self.transport()?;

        let Some(handle) = self.get_connection(connection_id) else {
            return Ok(false);
        };

        if !room.admits(&handle) {
            ConnectionMetrics::record_join_denied();
            tracing::debug!(connection_id = %connection_id, room = %room, "Room join refused");
            return Ok(false);
        }

        self.rooms.entry(room.clone()).or_default().insert(connection_id);

        // Lost a race with disconnect: undo so the room never outlives the registry entry
        if !self.connections.contains_key(&connection_id) {
            self.remove_member(room, connection_id);
            return Ok(false);
        }

        tracing::debug!(connection_id = %connection_id, room = %room, "Joined room");
        Ok(true)
    }

    /// Leave a room. Returns whether the connection was a member.
    pub fn leave_room(&self, connection_id: Uuid, room: &Room) -> Result<bool> {
        self.transport()?;

        let removed = self.remove_member(room, connection_id);
        if removed {
            tracing::debug!(connection_id = %connection_id, room = %room, "Left room");
        }
        Ok(removed)
    }

    fn remove_member(&self, room: &Room, connection_id: Uuid) -> bool {
        let removed = self
            .rooms
            .get_mut(room)
            .map(|mut members| members.remove(&connection_id))
            .unwrap_or(false);
        self.rooms.remove_if(room, |_, members| members.is_empty());
        removed
    }

    fn room_members(&self, room: &Room) -> Vec<Arc<ConnectionHandle>> {
        self.rooms
            .get(room)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Send `payload` under `topic` to every current member of `room`.
    ///
    /// Fire-and-forget: a member whose queue is full or closed is skipped and
    /// counted as failed. Broadcasting to an empty room is a no-op, as is any
    /// broadcast once shutdown has started.
    pub fn broadcast<T: Serialize>(
        &self,
        room: &Room,
        topic: Topic,
        payload: &T,
    ) -> Result<BroadcastOutcome> {
        self.transport()?;
        if self.closing.load(Ordering::Acquire) {
            tracing::debug!(room = %room, topic = %topic, "Broadcast suppressed during shutdown");
            return Ok(BroadcastOutcome::default());
        }

        let members = self.room_members(room);
        if members.is_empty() {
            return Ok(BroadcastOutcome::default());
        }

        let message = ServerMessage::event(topic, serde_json::to_value(payload)?);
        let outbound = OutboundMessage::preserialize(&message)?;

        let mut outcome = BroadcastOutcome::default();
        for member in &members {
            match member.try_send(outbound.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    outcome.failed += 1;
                    tracing::debug!(
                        connection_id = %member.id,
                        topic = %topic,
                        error = %e,
                        "Dropped broadcast for connection"
                    );
                }
            }
        }

        BroadcastMetrics::record(topic, outcome.delivered, outcome.failed);
        tracing::debug!(
            room = %room,
            topic = %topic,
            delivered = outcome.delivered,
            failed = outcome.failed,
            "Broadcast sent"
        );

        Ok(outcome)
    }

    /// Current number of registered members of `room`
    pub fn room_size(&self, room: &Room) -> Result<usize> {
        self.transport()?;
        Ok(self
            .rooms
            .get(room)
            .map(|ids| ids.iter().filter(|id| self.connections.contains_key(*id)).count())
            .unwrap_or(0))
    }

    /// Whether `connection_id` is currently a member of `room`
    pub fn is_member(&self, connection_id: Uuid, room: &Room) -> bool {
        self.rooms
            .get(room)
            .map(|ids| ids.contains(&connection_id))
            .unwrap_or(false)
            && self.connections.contains_key(&connection_id)
    }

    /// Total live connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn operator_count(&self) -> usize {
        self.connections.iter().filter(|c| c.is_operator()).count()
    }

    pub fn get_connection(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    /// Rooms the connection currently belongs to
    pub fn rooms_of(&self, connection_id: Uuid) -> Vec<Room> {
        if !self.connections.contains_key(&connection_id) {
            return Vec::new();
        }

        self.rooms
            .iter()
            .filter(|entry| entry.value().contains(&connection_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn stats(&self) -> ConnectionStats {
        let mut operator_connections = 0;
        let mut anonymous_connections = 0;
        for entry in self.connections.iter() {
            if entry.is_operator() {
                operator_connections += 1;
            }
            if entry.identity.is_anonymous() {
                anonymous_connections += 1;
            }
        }

        let rooms: HashMap<String, usize> = self
            .rooms
            .iter()
            .filter_map(|entry| {
                let live = entry
                    .value()
                    .iter()
                    .filter(|id| self.connections.contains_key(*id))
                    .count();
                (live > 0).then(|| (entry.key().name(), live))
            })
            .collect();

        ConnectionStats {
            total_connections: self.connections.len(),
            operator_connections,
            anonymous_connections,
            rooms,
        }
    }

    /// Close the transport and forcibly disconnect every live connection.
    ///
    /// Resolves once the transport confirms it is closed. Calling it again
    /// is harmless and returns `Ok(0)`.
    pub async fn shutdown(&self) -> Result<usize> {
        let transport = self.transport()?.clone();

        if self.closing.swap(true, Ordering::AcqRel) {
            tracing::debug!("Connection manager shutdown already started");
        }

        let ids: Vec<Uuid> = self.connections.iter().map(|entry| *entry.key()).collect();
        let mut disconnected = 0;
        for id in ids {
            if let Some(handle) = self.remove_connection(id) {
                handle.close();
                disconnected += 1;
            }
        }
        self.rooms.clear();

        transport.close().await?;

        tracing::info!(disconnected = disconnected, "Connection manager shut down");
        Ok(disconnected)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ServerTransport;
    use std::sync::atomic::AtomicUsize;

    fn initialized_manager() -> ConnectionManager {
        let manager = ConnectionManager::new();
        manager.initialize(Arc::new(ServerTransport::new()));
        manager
    }

    fn connect(
        manager: &ConnectionManager,
        identity: ConnectionIdentity,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (manager.on_connect(identity, tx).unwrap(), rx)
    }

    #[derive(Default)]
    struct CountingObserver {
        calls: AtomicUsize,
    }

    impl OperatorConnectObserver for CountingObserver {
        fn on_operator_connected(&self, _connection: &ConnectionHandle) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_addressing_before_initialize_fails() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::channel(1);

        assert!(matches!(
            manager.on_connect(ConnectionIdentity::operator("op"), tx),
            Err(ConnectionManagerError::NotInitialized)
        ));
        assert!(matches!(
            manager.room_size(&Room::Operators),
            Err(ConnectionManagerError::NotInitialized)
        ));
        assert!(matches!(
            manager.join_room(Uuid::new_v4(), &Room::Operators),
            Err(ConnectionManagerError::NotInitialized)
        ));
        assert!(matches!(
            manager.broadcast(&Room::Operators, Topic::HealthUpdate, &"x"),
            Err(ConnectionManagerError::NotInitialized)
        ));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let manager = ConnectionManager::new();
        assert!(manager.initialize(Arc::new(ServerTransport::new())));
        let (op, _rx) = connect(&manager, ConnectionIdentity::operator("op"));

        assert!(!manager.initialize(Arc::new(ServerTransport::new())));
        // Registry survives the second call
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.is_member(op.id, &Room::Operators));
    }

    #[test]
    fn test_operator_auto_joins_and_notifies_observer_once() {
        let manager = initialized_manager();
        let observer = Arc::new(CountingObserver::default());
        assert!(manager.set_operator_observer(observer.clone()));

        let (op, _rx) = connect(&manager, ConnectionIdentity::operator("op"));
        assert!(manager.is_member(op.id, &Room::Operators));
        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);

        let _resident = connect(&manager, ConnectionIdentity::tenant_member("u", "s1"));
        let _anon = connect(&manager, ConnectionIdentity::anonymous());
        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.room_size(&Room::Operators).unwrap(), 1);
    }

    #[test]
    fn test_second_observer_is_rejected() {
        let manager = initialized_manager();
        assert!(manager.set_operator_observer(Arc::new(CountingObserver::default())));
        assert!(!manager.set_operator_observer(Arc::new(CountingObserver::default())));
    }

    #[test]
    fn test_non_operator_cannot_join_operator_room() {
        let manager = initialized_manager();
        let (resident, _r1) = connect(&manager, ConnectionIdentity::tenant_member("u", "s1"));
        let (anon, _r2) = connect(&manager, ConnectionIdentity::anonymous());

        assert!(!manager.join_room(resident.id, &Room::Operators).unwrap());
        assert!(!manager.join_room(anon.id, &Room::Operators).unwrap());
        assert_eq!(manager.room_size(&Room::Operators).unwrap(), 0);
        assert!(manager.rooms_of(resident.id).is_empty());
    }

    #[test]
    fn test_tenant_room_rules() {
        let manager = initialized_manager();
        let (member, _r1) = connect(&manager, ConnectionIdentity::tenant_member("u1", "s1"));
        let (outsider, _r2) = connect(&manager, ConnectionIdentity::tenant_member("u2", "s2"));
        let (op, _r3) = connect(&manager, ConnectionIdentity::operator("op"));
        let room = Room::tenant("s1");

        assert!(manager.join_room(member.id, &room).unwrap());
        assert!(!manager.join_room(outsider.id, &room).unwrap());
        assert!(manager.join_room(op.id, &room).unwrap());
        assert_eq!(manager.room_size(&room).unwrap(), 2);

        assert!(manager.leave_room(member.id, &room).unwrap());
        assert!(!manager.leave_room(member.id, &room).unwrap());
        assert_eq!(manager.room_size(&room).unwrap(), 1);
    }

    #[test]
    fn test_join_unknown_connection_is_silent() {
        let manager = initialized_manager();
        assert!(!manager.join_room(Uuid::new_v4(), &Room::tenant("s1")).unwrap());
        assert!(manager.stats().rooms.is_empty());
    }

    #[test]
    fn test_room_size_after_connects_and_disconnects() {
        let manager = initialized_manager();
        let operators: Vec<_> = (0..5)
            .map(|i| connect(&manager, ConnectionIdentity::operator(format!("op-{}", i))))
            .collect();

        for (handle, _) in operators.iter().take(3) {
            assert!(manager.on_disconnect(handle.id).unwrap());
        }

        assert_eq!(manager.room_size(&Room::Operators).unwrap(), 2);
        assert_eq!(manager.connection_count(), 2);
    }

    #[test]
    fn test_disconnect_clears_all_memberships() {
        let manager = initialized_manager();
        let (op, _rx) = connect(&manager, ConnectionIdentity::operator("op"));
        manager.join_room(op.id, &Room::tenant("s1")).unwrap();
        assert_eq!(manager.rooms_of(op.id).len(), 2);

        assert!(manager.on_disconnect(op.id).unwrap());
        assert!(!manager.on_disconnect(op.id).unwrap());
        assert!(manager.rooms_of(op.id).is_empty());
        assert!(manager.stats().rooms.is_empty());
        assert!(manager.get_connection(op.id).is_none());
    }

    #[test]
    fn test_broadcast_reaches_room_members_only() {
        let manager = initialized_manager();
        let (_op, mut op_rx) = connect(&manager, ConnectionIdentity::operator("op"));
        let (_resident, mut resident_rx) =
            connect(&manager, ConnectionIdentity::tenant_member("u", "s1"));

        let outcome = manager
            .broadcast(&Room::Operators, Topic::HealthUpdate, &serde_json::json!({"status": "healthy"}))
            .unwrap();
        assert_eq!(outcome, BroadcastOutcome { delivered: 1, failed: 0 });

        let text = op_rx.try_recv().unwrap().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["topic"], "health:update");
        assert_eq!(value["payload"]["status"], "healthy");
        assert!(resident_rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_to_empty_room_is_noop() {
        let manager = initialized_manager();
        let outcome = manager
            .broadcast(&Room::tenant("nobody"), Topic::Notification, &"hello")
            .unwrap();
        assert_eq!(outcome, BroadcastOutcome::default());
    }

    #[test]
    fn test_broadcast_counts_full_queues_as_failed() {
        let manager = initialized_manager();
        let (tx, _rx) = mpsc::channel(1);
        manager.on_connect(ConnectionIdentity::operator("op"), tx).unwrap();

        let first = manager.broadcast(&Room::Operators, Topic::StatsUpdate, &1).unwrap();
        let second = manager.broadcast(&Room::Operators, Topic::StatsUpdate, &2).unwrap();

        assert_eq!(first.delivered, 1);
        assert_eq!(second, BroadcastOutcome { delivered: 0, failed: 1 });
    }

    #[tokio::test]
    async fn test_shutdown_twice_disconnects_everyone() {
        let manager = initialized_manager();
        let (op, _r1) = connect(&manager, ConnectionIdentity::operator("op"));
        let (_resident, _r2) = connect(&manager, ConnectionIdentity::tenant_member("u", "s1"));

        assert_eq!(manager.shutdown().await.unwrap(), 2);
        assert_eq!(manager.shutdown().await.unwrap(), 0);

        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.room_size(&Room::Operators).unwrap(), 0);
        assert!(op.is_closed());
        assert!(manager.transport().unwrap().is_closed());

        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(
            manager.on_connect(ConnectionIdentity::operator("late"), tx),
            Err(ConnectionManagerError::ShuttingDown)
        ));
    }

    #[test]
    fn test_rooms_never_report_unregistered_members() {
        let manager = initialized_manager();
        let (member, _rx) = connect(&manager, ConnectionIdentity::tenant_member("u", "s1"));
        manager.join_room(member.id, &Room::tenant("s1")).unwrap();

        // Membership left behind for an id the registry no longer knows
        let gone = Uuid::new_v4();
        manager.rooms.entry(Room::tenant("s1")).or_default().insert(gone);
        manager.rooms.entry(Room::tenant("s2")).or_default().insert(gone);

        let stats = manager.stats();
        assert_eq!(stats.rooms.get("tenant:s1"), Some(&1));
        assert!(!stats.rooms.contains_key("tenant:s2"));
        assert!(manager.rooms_of(gone).is_empty());
        assert!(!manager.is_member(gone, &Room::tenant("s1")));
        assert_eq!(manager.room_size(&Room::tenant("s2")).unwrap(), 0);
    }

    #[test]
    fn test_join_racing_disconnect_leaves_no_room() {
        let manager = Arc::new(initialized_manager());
        let room = Room::tenant("s1");

        for _ in 0..2_000 {
            let (member, _rx) = connect(&manager, ConnectionIdentity::tenant_member("u", "s1"));
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let joiner = {
                let manager = manager.clone();
                let barrier = barrier.clone();
                let room = room.clone();
                let id = member.id;
                std::thread::spawn(move || {
                    barrier.wait();
                    manager.join_room(id, &room).unwrap();
                })
            };

            barrier.wait();
            assert!(manager.on_disconnect(member.id).unwrap());
            joiner.join().unwrap();

            assert_eq!(manager.connection_count(), 0);
            assert!(manager.rooms.is_empty(), "stale membership after disconnect");
            assert!(manager.stats().rooms.is_empty());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_connect_racing_shutdown_is_never_left_open() {
        for _ in 0..200 {
            let manager = Arc::new(initialized_manager());

            let connectors: Vec<_> = (0..3)
                .map(|_| {
                    let manager = manager.clone();
                    tokio::task::spawn_blocking(move || {
                        let mut accepted = Vec::new();
                        loop {
                            let (tx, _rx) = mpsc::channel(1);
                            match manager.on_connect(ConnectionIdentity::anonymous(), tx) {
                                Ok(handle) => accepted.push(handle),
                                Err(ConnectionManagerError::ShuttingDown) => return accepted,
                                Err(e) => panic!("unexpected error: {e}"),
                            }
                        }
                    })
                })
                .collect();

            tokio::task::yield_now().await;
            manager.shutdown().await.unwrap();

            for connector in connectors {
                for handle in connector.await.unwrap() {
                    assert!(handle.is_closed());
                }
            }
            assert_eq!(manager.connection_count(), 0);
        }
    }
}

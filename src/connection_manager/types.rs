//! Connection handle and related types

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::auth::{AuthTier, ConnectionIdentity};
use crate::transport::TransportError;
use crate::websocket::OutboundMessage;

/// Handle for a single live connection.
///
/// Identity attributes are fixed at creation and never change.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub identity: ConnectionIdentity,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<OutboundMessage>,
    close_tx: watch::Sender<bool>,
}

impl ConnectionHandle {
    pub fn new(identity: ConnectionIdentity, sender: mpsc::Sender<OutboundMessage>) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            identity,
            connected_at: Utc::now(),
            sender,
            close_tx,
        }
    }

    pub fn tier(&self) -> AuthTier {
        self.identity.tier
    }

    pub fn is_operator(&self) -> bool {
        self.identity.is_operator()
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.identity.subject_id.as_deref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.identity.tenant_id.as_deref()
    }

    /// Queue a message without waiting; fails when the queue is full or the
    /// writer has gone away
    pub fn try_send(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::TrySendError<OutboundMessage>> {
        self.sender.try_send(message)
    }

    pub async fn send(
        &self,
        message: impl Into<OutboundMessage>,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(message.into()).await
    }

    /// Ask the session owning this handle to terminate
    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// Resolves once [`ConnectionHandle::close`] has been called
    pub fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.close_tx.subscribe();
        async move {
            let _ = rx.wait_for(|closed| *closed).await;
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConnectionManagerError {
    /// Addressing the registry before `initialize` is a lifecycle ordering bug
    #[error("Connection manager used before initialization")]
    NotInitialized,

    #[error("Connection manager is shutting down")]
    ShuttingDown,

    #[error("Failed to encode broadcast payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Observer notified synchronously when an operator connects
pub trait OperatorConnectObserver: Send + Sync {
    fn on_operator_connected(&self, connection: &ConnectionHandle);
}

/// Outcome of a fire-and-forget room broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub failed: usize,
}

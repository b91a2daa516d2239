//! Binding between the connection manager and the network listener.
//!
//! The manager never talks to axum directly: it only needs to be able to
//! close whatever accepts connections and to learn when that has happened.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport stopped unexpectedly: {0}")]
    Stopped(String),
}

/// Listener-side handle the connection manager is bound to
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stop accepting connections and wait until the listener confirms it is
    /// down. Closing an already closed transport succeeds.
    async fn close(&self) -> Result<(), TransportError>;

    fn is_closed(&self) -> bool;
}

/// Transport backed by an `axum::serve` task.
///
/// The serve task passes [`ServerTransport::shutdown_signal`] to
/// `with_graceful_shutdown`, calls [`ServerTransport::mark_serving`] before it
/// starts and [`ServerTransport::mark_stopped`] once it returns.
pub struct ServerTransport {
    shutdown_tx: watch::Sender<bool>,
    /// `true` while a serve task is running
    serving_tx: watch::Sender<bool>,
}

impl ServerTransport {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (serving_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            serving_tx,
        }
    }

    pub fn mark_serving(&self) {
        self.serving_tx.send_replace(true);
    }

    pub fn mark_stopped(&self) {
        self.serving_tx.send_replace(false);
        tracing::debug!("Server transport reported stopped");
    }

    pub fn is_serving(&self) -> bool {
        *self.serving_tx.borrow()
    }

    /// Resolves once `close` has been requested
    pub fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_tx.subscribe();
        async move {
            // Sender lives as long as the transport; an error means it is gone.
            let _ = rx.wait_for(|closing| *closing).await;
        }
    }
}

impl Default for ServerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ServerTransport {
    async fn close(&self) -> Result<(), TransportError> {
        let already_closing = self.shutdown_tx.send_replace(true);
        if already_closing {
            tracing::debug!("Transport close requested again");
        }

        let mut serving = self.serving_tx.subscribe();
        serving
            .wait_for(|serving| !*serving)
            .await
            .map_err(|e| TransportError::Stopped(e.to_string()))?;

        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow() && !self.is_serving()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_close_without_server_resolves_immediately() {
        let transport = ServerTransport::new();
        assert!(!transport.is_closed());

        transport.close().await.unwrap();
        assert!(transport.is_closed());

        // Second close is not an error
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_waits_for_serve_task() {
        let transport = Arc::new(ServerTransport::new());
        transport.mark_serving();

        let signal = transport.shutdown_signal();
        let server = {
            let transport = transport.clone();
            tokio::spawn(async move {
                signal.await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                transport.mark_stopped();
            })
        };

        transport.close().await.unwrap();
        assert!(!transport.is_serving());
        assert!(transport.is_closed());
        server.await.unwrap();
    }
}

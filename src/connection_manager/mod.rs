//! Connection management for live dashboard sessions
//!
//! This module provides:
//! - The connection registry and its lifecycle binding
//! - Authorization-gated room membership
//! - Fire-and-forget room broadcasts
//! - Connection statistics

mod manager;
mod room;
mod stats;
mod types;

pub use manager::ConnectionManager;
pub use room::{Room, OPERATOR_ROOM};
pub use stats::ConnectionStats;
pub use types::{
    BroadcastOutcome, ConnectionHandle, ConnectionManagerError, OperatorConnectObserver,
};

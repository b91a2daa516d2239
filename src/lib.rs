// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Monitoring core
pub mod auth;
pub mod connection_manager;
pub mod health;
pub mod lifecycle;
pub mod stats;
pub mod storage;
pub mod tasks;
pub mod transport;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

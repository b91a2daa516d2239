//! Connection statistics structures

use serde::Serialize;
use std::collections::HashMap;

/// Registry-wide connection statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub operator_connections: usize,
    pub anonymous_connections: usize,
    /// Member count per non-empty room
    pub rooms: HashMap<String, usize>,
}

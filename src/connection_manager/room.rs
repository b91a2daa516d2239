//! Broadcast rooms and their admission rule.

use std::fmt;

use super::ConnectionHandle;

/// Wire name of the global operator room
pub const OPERATOR_ROOM: &str = "operators";

const TENANT_ROOM_PREFIX: &str = "tenant:";

const MAX_TENANT_ID_LEN: usize = 64;

/// Named, authorization-gated broadcast target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Platform operators only
    Operators,
    /// Members of one tenant, plus any operator
    Tenant(String),
}

impl Room {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Room::Tenant(tenant_id.into())
    }

    /// Parse a wire room name. Returns `None` for anything malformed.
    pub fn parse(name: &str) -> Option<Self> {
        if name == OPERATOR_ROOM {
            return Some(Room::Operators);
        }

        let tenant_id = name.strip_prefix(TENANT_ROOM_PREFIX)?;
        is_valid_tenant_id(tenant_id).then(|| Room::Tenant(tenant_id.to_string()))
    }

    pub fn name(&self) -> String {
        match self {
            Room::Operators => OPERATOR_ROOM.to_string(),
            Room::Tenant(id) => format!("{}{}", TENANT_ROOM_PREFIX, id),
        }
    }

    /// Whether `connection` may be a member of this room
    pub fn admits(&self, connection: &ConnectionHandle) -> bool {
        match self {
            Room::Operators => connection.is_operator(),
            Room::Tenant(id) => {
                connection.is_operator() || connection.tenant_id() == Some(id.as_str())
            }
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Operators => f.write_str(OPERATOR_ROOM),
            Room::Tenant(id) => write!(f, "{}{}", TENANT_ROOM_PREFIX, id),
        }
    }
}

fn is_valid_tenant_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_TENANT_ID_LEN {
        return false;
    }

    // Only allow alphanumeric, dash, and underscore
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

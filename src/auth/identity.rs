//! Connection identity derived once from handshake claims.

use serde::{Deserialize, Serialize};

use super::Claims;

/// Platform roles known to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    SocietyAdmin,
    Resident,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::SuperAdmin,
        Role::Admin,
        Role::SocietyAdmin,
        Role::Resident,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::SocietyAdmin => "society_admin",
            Role::Resident => "resident",
        }
    }

    /// Case-insensitive parse; unknown roles yield `None`
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|r| r.as_str() == normalized)
    }
}

/// Authorization tier of a live connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthTier {
    #[default]
    Unprivileged,
    Operator,
}

/// Attributes fixed for the lifetime of a connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionIdentity {
    pub subject_id: Option<String>,
    pub role: Option<Role>,
    pub tier: AuthTier,
    pub tenant_id: Option<String>,
}

impl ConnectionIdentity {
    /// Session that presented no usable credentials
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn operator(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            role: Some(Role::Admin),
            tier: AuthTier::Operator,
            tenant_id: None,
        }
    }

    pub fn tenant_member(subject_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            role: Some(Role::Resident),
            tier: AuthTier::Unprivileged,
            tenant_id: Some(tenant_id.into()),
        }
    }

    /// Derive the identity from validated claims.
    ///
    /// The operator tier is granted only when the claimed role is one of
    /// `operator_roles`; anything else, including an unknown role, is unprivileged.
    pub fn from_claims(claims: &Claims, operator_roles: &[String]) -> Self {
        let raw_role = claims.role().map(str::trim).unwrap_or_default();
        let is_operator = !raw_role.is_empty()
            && operator_roles
                .iter()
                .any(|r| r.eq_ignore_ascii_case(raw_role));

        Self {
            subject_id: Some(claims.sub.clone()).filter(|s| !s.is_empty()),
            role: Role::parse(raw_role),
            tier: if is_operator {
                AuthTier::Operator
            } else {
                AuthTier::Unprivileged
            },
            tenant_id: claims.tenant_id().map(str::to_string),
        }
    }

    pub fn is_operator(&self) -> bool {
        self.tier == AuthTier::Operator
    }

    pub fn is_anonymous(&self) -> bool {
        self.subject_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: Option<&str>, tenant: Option<&str>) -> Claims {
        Claims {
            sub: "user-1".to_string(),
            exp: chrono::Utc::now().timestamp() + 60,
            iat: chrono::Utc::now().timestamp(),
            role: role.map(str::to_string),
            tenant_id: tenant.map(str::to_string),
            extra: Default::default(),
        }
    }

    fn operator_roles() -> Vec<String> {
        vec!["super_admin".to_string(), "admin".to_string()]
    }

    #[test]
    fn test_admin_claims_grant_operator_tier() {
        let identity = ConnectionIdentity::from_claims(&claims(Some("ADMIN"), None), &operator_roles());
        assert_eq!(identity.tier, AuthTier::Operator);
        assert_eq!(identity.role, Some(Role::Admin));
        assert_eq!(identity.subject_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_resident_claims_are_unprivileged() {
        let identity = ConnectionIdentity::from_claims(
            &claims(Some("resident"), Some("society-9")),
            &operator_roles(),
        );
        assert_eq!(identity.tier, AuthTier::Unprivileged);
        assert_eq!(identity.tenant_id.as_deref(), Some("society-9"));
    }

    #[test]
    fn test_unknown_or_missing_role_is_unprivileged() {
        let identity = ConnectionIdentity::from_claims(&claims(Some("root"), None), &operator_roles());
        assert_eq!(identity.tier, AuthTier::Unprivileged);
        assert_eq!(identity.role, None);

        let identity = ConnectionIdentity::from_claims(&claims(None, Some("")), &operator_roles());
        assert_eq!(identity.tier, AuthTier::Unprivileged);
        assert_eq!(identity.tenant_id, None);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("Society_Admin"), Some(Role::SocietyAdmin));
        assert_eq!(Role::parse("guest"), None);
        assert_eq!(Role::COUNT, 4);
    }
}

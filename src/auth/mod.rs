mod claims;
mod identity;
mod jwt;

pub use claims::Claims;
pub use identity::{AuthTier, ConnectionIdentity, Role};
pub use jwt::JwtValidator;

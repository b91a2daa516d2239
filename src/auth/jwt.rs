use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::JwtConfig;
use crate::error::AppError;

use super::{Claims, ConnectionIdentity};

pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
    operator_roles: Vec<String>,
}

impl JwtValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
            operator_roles: config.operator_roles.clone(),
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }

    /// Resolve a handshake token into a connection identity.
    ///
    /// Never fails: a missing or rejected token yields an anonymous,
    /// unprivileged identity so the session can still connect.
    pub fn identify(&self, token: Option<&str>) -> ConnectionIdentity {
        let Some(token) = token else {
            return ConnectionIdentity::anonymous();
        };

        match self.validate(token) {
            Ok(claims) => ConnectionIdentity::from_claims(&claims, &self.operator_roles),
            Err(e) => {
                tracing::warn!(error = %e, "Handshake token rejected, continuing as anonymous");
                ConnectionIdentity::anonymous()
            }
        }
    }
}

//! Verification of session tokens minted by the primary authentication service.
//!
//! Tokens are HS256 JWTs; only verification lives here.

use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: the user id.
    pub sub: i64,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    /// Set while the account must change its password before doing anything else.
    #[serde(default)]
    pub pwd_reset: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing session token")]
    Missing,
    #[error("invalid session token")]
    Invalid,
    #[error("password reset required")]
    PasswordResetRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
}

#[derive(Clone)]
pub struct SessionVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl SessionVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        let claims = decode::<SessionClaims>(token, &self.key, &self.validation)
            .map_err(|_| AuthError::Invalid)?
            .claims;
        if claims.pwd_reset {
            return Err(AuthError::PasswordResetRequired);
        }
        Ok(Principal {
            user_id: claims.sub,
        })
    }
}

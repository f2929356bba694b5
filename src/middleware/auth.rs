// Identity of the caller behind a validated access token

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::jwt::{AccessTokenClaims, JwtError};

/// Authenticated user information extracted from JWT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Option<String>,
    pub exp: u64,
}

impl TryFrom<AccessTokenClaims> for AuthenticatedUser {
    type Error = JwtError;

    fn try_from(claims: AccessTokenClaims) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: claims.user_id()?,
            email: claims.email,
            role: claims.role,
            exp: claims.exp,
        })
    }
}

//! Session token issuance
//!
//! Tokens are HS256 JWTs and opaque to clients; the store is the source of
//! truth for revocation via the `jti` tracked in `user_sessions`. Access
//! tokens live minutes, refresh tokens days.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

pub const ACCESS_TOKEN_TTL: Duration = Duration::minutes(30);
pub const REFRESH_TOKEN_TTL: Duration = Duration::days(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    /// Session row key; revocation checks go through the store
    pub jti: String,
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly issued access/refresh pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_jti: String,
    pub refresh_jti: String,
    pub access_expires_at: OffsetDateTime,
    pub refresh_expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue_pair(&self, user_id: Uuid) -> ApiResult<TokenPair> {
        let now = OffsetDateTime::now_utc();
        let access_jti = Uuid::new_v4().to_string();
        let refresh_jti = Uuid::new_v4().to_string();
        let access_expires_at = now + ACCESS_TOKEN_TTL;
        let refresh_expires_at = now + REFRESH_TOKEN_TTL;

        let access_token = self.encode(Claims {
            sub: user_id,
            jti: access_jti.clone(),
            token_type: TokenType::Access,
            iat: now.unix_timestamp(),
            exp: access_expires_at.unix_timestamp(),
        })?;
        let refresh_token = self.encode(Claims {
            sub: user_id,
            jti: refresh_jti.clone(),
            token_type: TokenType::Refresh,
            iat: now.unix_timestamp(),
            exp: refresh_expires_at.unix_timestamp(),
        })?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_jti,
            refresh_jti,
            access_expires_at,
            refresh_expires_at,
        })
    }

    /// Decode and validate a token, enforcing the expected type
    pub fn verify(&self, token: &str, expected: TokenType) -> ApiResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|_| ApiError::Unauthorized("invalid token".to_string()))?;

        if data.claims.token_type != expected {
            return Err(ApiError::Unauthorized("wrong token type".to_string()));
        }
        Ok(data.claims)
    }

    fn encode(&self, claims: Claims) -> ApiResult<String> {
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("token encoding failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new("test-secret")
    }

    #[test]
    fn pair_roundtrip() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let pair = manager.issue_pair(user_id).unwrap();

        let access = manager.verify(&pair.access_token, TokenType::Access).unwrap();
        assert_eq!(access.sub, user_id);
        assert_eq!(access.jti, pair.access_jti);

        let refresh = manager
            .verify(&pair.refresh_token, TokenType::Refresh)
            .unwrap();
        assert_eq!(refresh.jti, pair.refresh_jti);
        assert_ne!(pair.access_jti, pair.refresh_jti);
    }

    #[test]
    fn wrong_token_type_rejected() {
        let manager = manager();
        let pair = manager.issue_pair(Uuid::new_v4()).unwrap();
        assert!(manager
            .verify(&pair.access_token, TokenType::Refresh)
            .is_err());
        assert!(manager
            .verify(&pair.refresh_token, TokenType::Access)
            .is_err());
    }

    #[test]
    fn wrong_secret_rejected() {
        let pair = manager().issue_pair(Uuid::new_v4()).unwrap();
        let other = JwtManager::new("different-secret");
        assert!(other.verify(&pair.access_token, TokenType::Access).is_err());
    }

    #[test]
    fn garbage_rejected() {
        assert!(manager().verify("not.a.jwt", TokenType::Access).is_err());
    }
}

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::{
    config::{AppConfig, DEFAULT_JWT_EXPIRES_IN_SECS},
    dto::auth::Claims,
    entity::enums::Role,
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
};

/// Issues and validates HS256 session tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::try_seconds(ttl_secs)
                .unwrap_or_else(|| Duration::seconds(DEFAULT_JWT_EXPIRES_IN_SECS)),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.jwt_secret, config.jwt_expires_in_secs)
    }

    pub fn issue(&self, user_id: Uuid, role: Role) -> AppResult<String> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

        let claims = Claims {
            sub: user_id.to_string(),
            role,
            iat: now.timestamp() as usize,
            exp: expiration.timestamp() as usize,
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
    }

    /// Every failure collapses to `Unauthorized`; callers never learn why a token was refused.
    pub fn verify(&self, token: &str) -> AppResult<AuthUser> {
        let decoded = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| AppError::Unauthorized)?;

        let user_id = Uuid::parse_str(&decoded.claims.sub).map_err(|_| AppError::Unauthorized)?;

        Ok(AuthUser {
            user_id,
            role: decoded.claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_round_trips_user_and_role() {
        let service = TokenService::new("secret", 3600);
        let user_id = Uuid::new_v4();
        let token = service.issue(user_id, Role::Admin).unwrap();

        let user = service.verify(&token).unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.role, Role::Admin);
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let token = TokenService::new("secret", 3600)
            .issue(Uuid::new_v4(), Role::User)
            .unwrap();
        let err = TokenService::new("other", 3600).verify(&token).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn expired_token_is_unauthorized() {
        // Well past the default validation leeway.
        let service = TokenService::new("secret", -3600);
        let token = service.issue(Uuid::new_v4(), Role::User).unwrap();
        let err = service.verify(&token).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn out_of_range_ttl_uses_the_default() {
        let service = TokenService::new("secret", i64::MAX);
        let token = service.issue(Uuid::new_v4(), Role::User).unwrap();
        assert!(service.verify(&token).is_ok());
    }

    #[test]
    fn garbage_is_unauthorized() {
        let service = TokenService::new("secret", 3600);
        for token in ["", "abc", "a.b.c"] {
            assert!(matches!(service.verify(token), Err(AppError::Unauthorized)));
        }
    }
}

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use uuid::Uuid;

use crate::{entity::enums::Role, error::AppError, state::AppState};

/// Authenticated caller, produced from a verified bearer token and passed explicitly into
/// services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owner filter for scoped lookups: admins see everything, everyone else only their own.
    pub fn scope(&self) -> Option<Uuid> {
        if self.is_admin() {
            None
        } else {
            Some(self.user_id)
        }
    }
}

pub fn ensure_admin(user: &AuthUser) -> Result<(), AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .ok_or(AppError::Unauthorized)?
        .to_str()
        .map_err(|_| AppError::Unauthorized)?;

    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(AppError::Unauthorized)?;
    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }
    Ok(token)
}

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let state = AppState::from_ref(state);
        state.tokens.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header_value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header_value {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn extracts_bearer_token() {
        let parts = parts_with(Some("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&parts).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn missing_or_wrong_scheme_is_unauthorized() {
        for header_value in [None, Some("Basic abc"), Some("Bearer "), Some("abc")] {
            let parts = parts_with(header_value);
            assert!(matches!(bearer_token(&parts), Err(AppError::Unauthorized)));
        }
    }

    #[test]
    fn admin_scope_is_unrestricted() {
        let admin = AuthUser {
            user_id: Uuid::new_v4(),
            role: Role::Admin,
        };
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            role: Role::User,
        };
        assert_eq!(admin.scope(), None);
        assert_eq!(user.scope(), Some(user.user_id));
        assert!(ensure_admin(&admin).is_ok());
        assert!(matches!(ensure_admin(&user), Err(AppError::Forbidden)));
    }
}

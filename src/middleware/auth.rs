//! Authentication extractor for Axum handlers.
//!
//! A request is authenticated by an API token (`Authorization: Token <jwt>`,
//! `Bearer` is accepted too) or by the login session cookie.

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::CookieJar;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::{User, UserRole};
use crate::services::auth as auth_service;
use crate::services::session::{self, SESSION_COOKIE};
use crate::AppState;

/// Authenticated user.
///
/// Use as an Axum extractor in handlers that require authentication:
/// ```ignore
/// async fn handler(current_user: CurrentUser) -> impl IntoResponse { ... }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
    pub role: UserRole,
}

impl From<User> for CurrentUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            role: u.role,
        }
    }
}

/// Token carried by an `Authorization` header value.
fn header_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    match scheme {
        "Token" | "Bearer" => Some(token),
        _ => None,
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(header) = parts.headers.get("Authorization") {
            let token = header
                .to_str()
                .ok()
                .and_then(header_token)
                .ok_or(AppError::Unauthorized)?;
            let user =
                auth_service::authenticate_token(&state.db, token, &state.config.jwt_secret)
                    .await?;
            return Ok(user.into());
        }

        let jar = CookieJar::from_headers(&parts.headers);
        let session_id = jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or(AppError::Unauthorized)?;

        let user_id = session::lookup(&state.redis, &session_id)
            .await?
            .ok_or(AppError::Unauthorized)?;
        let user = auth_service::find_active_user(&state.db, user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;

        Ok(user.into())
    }
}

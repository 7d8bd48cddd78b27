//! Authentication routes: login, logout, API token, current session.

use axum::{extract::State, http::HeaderMap, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use validator::Validate;

use crate::errors::{ApiResponse, AppError};
use crate::middleware::auth::CurrentUser;
use crate::models::user::UserResponse;
use crate::services::auth::{self as auth_service, ApiToken};
use crate::services::session::{self, SESSION_COOKIE};
use crate::AppState;

/// Login form. `email` carries the username.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "username is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// POST /api/v1/login — password login, opens a session.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<(CookieJar, Json<ApiResponse<UserResponse>>), AppError> {
    let ip = client_ip(&headers);
    if body.validate().is_err() {
        tracing::warn!(target: "audit", ip = %ip, "Login failed: empty credentials");
        return Err(AppError::InvalidCredentials);
    }

    let user = auth_service::login(&state.db, &body.email, &body.password, &ip).await?;
    let session_id = session::create(&state.redis, user.id, state.config.session_ttl_secs).await?;

    let cookie = Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.tls_paths().is_some())
        .build();

    Ok((jar.add(cookie), ApiResponse::success(UserResponse::from(user))))
}

/// POST /api/v1/logout — destroys the session.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiResponse<&'static str>>), AppError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        session::destroy(&state.redis, cookie.value()).await?;
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((jar, ApiResponse::success("Logged out successfully")))
}

/// GET /api/v1/token — issue an API token for the current user.
pub async fn token(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<ApiResponse<ApiToken>>, AppError> {
    let user = auth_service::find_active_user(&state.db, current_user.id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    let token = auth_service::generate_api_token(
        &user,
        &state.config.jwt_secret,
        state.config.jwt_token_expiry_secs,
    )?;
    tracing::info!(target: "audit", username = %user.username, "API token issued");
    Ok(ApiResponse::success(token))
}

/// GET /api/v1/session — current user profile.
pub async fn current_session(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<ApiResponse<UserResponse>>, AppError> {
    let user = auth_service::find_active_user(&state.db, current_user.id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(ApiResponse::success(UserResponse::from(user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_uses_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");

        headers.insert("X-Forwarded-For", "10.0.0.1, 192.168.1.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "10.0.0.1");
    }

    #[test]
    fn login_request_requires_both_fields() {
        let req: LoginRequest =
            serde_json::from_str(r#"{"email": "", "password": "x"}"#).unwrap();
        assert!(req.validate().is_err());

        let req: LoginRequest =
            serde_json::from_str(r#"{"email": "admin", "password": "x"}"#).unwrap();
        assert!(req.validate().is_ok());
    }
}

//! Role-based access control extractor for Axum handlers.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::errors::AppError;
use crate::middleware::auth::CurrentUser;
use crate::AppState;

/// Extractor that requires a role allowed to modify vulnerabilities
/// (`admin` or `pentester`).
#[derive(Debug, Clone)]
pub struct RequireWriter(pub CurrentUser);

impl FromRequestParts<AppState> for RequireWriter {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.role.can_write() {
            tracing::warn!(target: "audit", username = %user.username, "Write denied for read-only role");
            return Err(AppError::Forbidden(
                "Pentester or admin access required".to_string(),
            ));
        }
        Ok(RequireWriter(user))
    }
}

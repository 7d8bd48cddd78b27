//! User model with role-based access control.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Pentester,
    AssetOwner,
    Client,
}

impl UserRole {
    /// Roles allowed to create, modify and delete vulnerabilities.
    pub fn can_write(&self) -> bool {
        matches!(self, Self::Admin | Self::Pentester)
    }
}

/// Full user row from database (includes password_hash, never serialize to API).
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User response DTO, excludes password_hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            role: u.role,
            is_active: u.is_active,
            last_login: u.last_login,
            created_at: u.created_at,
        }
    }
}

/// Ranking row of `GET /vulns/top_users`.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TopUser {
    pub id: Uuid,
    pub username: String,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_role_serialization() {
        let json = serde_json::to_string(&UserRole::AssetOwner).unwrap();
        assert_eq!(json, "\"asset_owner\"");
    }

    #[test]
    fn only_admins_and_pentesters_write() {
        assert!(UserRole::Admin.can_write());
        assert!(UserRole::Pentester.can_write());
        assert!(!UserRole::AssetOwner.can_write());
        assert!(!UserRole::Client.can_write());
    }

    #[test]
    fn user_response_excludes_password() {
        let user = User {
            id: Uuid::nil(),
            username: "test".to_string(),
            email: "test@test.com".to_string(),
            password_hash: "secret_hash".to_string(),
            role: UserRole::Pentester,
            is_active: true,
            last_login: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let response: UserResponse = user.into();
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("hash"));
        assert_eq!(response.role, UserRole::Pentester);
    }
}

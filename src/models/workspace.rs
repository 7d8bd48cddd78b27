use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Tenant scoping every vulnerability.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub readonly: bool,
    pub created_at: DateTime<Utc>,
}

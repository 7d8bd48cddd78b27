pub mod config;
pub mod db;
pub mod errors;
pub mod filters;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use sqlx::PgPool;

use crate::services::storage::Depot;

/// Shared application state passed to all Axum handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: config::AppConfig,
    /// Session store.
    pub redis: redis::Client,
    /// Attachment blob store.
    pub depot: Depot,
}

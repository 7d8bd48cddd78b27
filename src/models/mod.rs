//! Database models and DTOs for all domain entities.

pub mod attachment;
pub mod custom_field;
pub mod host;
pub mod pagination;
pub mod user;
pub mod vulnerability;
pub mod workspace;

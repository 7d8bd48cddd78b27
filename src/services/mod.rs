//! Business logic services.

pub mod assignment;
pub mod attachment;
pub mod auth;
pub mod custom_fields;
pub mod export;
pub mod filter;
pub mod references;
pub mod session;
pub mod storage;
pub mod vulnerability;
pub mod workspace;

//! Hosts, their hostnames and services. Vulnerabilities hang off these.

use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct Host {
    pub id: i64,
    pub workspace_id: i64,
    pub ip: String,
    pub os: String,
    pub description: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Service {
    pub id: i64,
    pub host_id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub port: i32,
    pub protocol: String,
    pub status: String,
    pub version: String,
}

/// Service as embedded in a serialized vulnerability.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceSummary {
    #[serde(rename = "_id")]
    pub id: i64,
    pub ports: i32,
    pub status: String,
    pub protocol: String,
    pub name: String,
    pub version: String,
    pub summary: String,
}

impl From<&Service> for ServiceSummary {
    fn from(s: &Service) -> Self {
        Self {
            id: s.id,
            ports: s.port,
            status: s.status.clone(),
            protocol: s.protocol.clone(),
            name: s.name.clone(),
            version: s.version.clone(),
            summary: format!("({}/{}) {}", s.port, s.protocol, s.name),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Hostname {
    pub host_id: i64,
    pub name: String,
}

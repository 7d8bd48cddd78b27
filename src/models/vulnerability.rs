//! Vulnerability model: enums, the generic row, the polymorphic domain type,
//! and the wire shapes used by the API.
//!
//! Plain and web vulnerabilities share one table. The row carries every
//! column; [`Vulnerability`] splits it into the shared fields plus a
//! [`VulnerabilityVariant`] selected by the `type` discriminant.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::attachment::{AttachmentPayload, EvidenceView};
use crate::models::host::ServiceSummary;
use crate::models::pagination::Pagination;

// -- Enums matching PostgreSQL --

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "severity_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(rename = "info", alias = "informational")]
    Informational,
    Low,
    #[serde(rename = "med", alias = "medium")]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Self::Informational,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Critical,
    ];

    /// Label stored in the database enum.
    pub fn db_label(&self) -> &'static str {
        match self {
            Self::Informational => "informational",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Short label used by the API and the web UI.
    pub fn api_label(&self) -> &'static str {
        match self {
            Self::Informational => "info",
            Self::Medium => "med",
            other => other.db_label(),
        }
    }

    /// Parse either label form, case-insensitively.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|s| s.db_label() == label || s.api_label() == label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "vulnerability_status")]
pub enum VulnerabilityStatus {
    #[sqlx(rename = "open")]
    #[serde(rename = "open", alias = "opened")]
    Open,
    #[sqlx(rename = "closed")]
    #[serde(rename = "closed")]
    Closed,
    #[sqlx(rename = "re-opened")]
    #[serde(rename = "re-opened")]
    ReOpened,
    #[sqlx(rename = "risk-accepted")]
    #[serde(rename = "risk-accepted")]
    RiskAccepted,
}

impl VulnerabilityStatus {
    pub const ALL: [VulnerabilityStatus; 4] =
        [Self::Open, Self::Closed, Self::ReOpened, Self::RiskAccepted];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::ReOpened => "re-opened",
            Self::RiskAccepted => "risk-accepted",
        }
    }

    /// Parse a status label, mapping the legacy `opened` to `open`.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        if label == "opened" {
            return Some(Self::Open);
        }
        Self::ALL.into_iter().find(|s| s.label() == label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "ease_of_resolution", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EaseOfResolution {
    Trivial,
    Simple,
    Moderate,
    Difficult,
    Infeasible,
}

impl EaseOfResolution {
    pub const ALL: [EaseOfResolution; 5] = [
        Self::Trivial,
        Self::Simple,
        Self::Moderate,
        Self::Difficult,
        Self::Infeasible,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Trivial => "trivial",
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Difficult => "difficult",
            Self::Infeasible => "infeasible",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|e| e.label() == label)
    }
}

/// Discriminant of the polymorphic vulnerability table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "vulnerability_type", rename_all = "snake_case")]
pub enum VulnerabilityType {
    Vulnerability,
    VulnerabilityWeb,
}

impl VulnerabilityType {
    /// Resolve the API discriminator (`Vulnerability` / `VulnerabilityWeb`).
    pub fn from_discriminator(value: &str) -> Option<Self> {
        match value {
            "Vulnerability" => Some(Self::Vulnerability),
            "VulnerabilityWeb" => Some(Self::VulnerabilityWeb),
            _ => None,
        }
    }

    pub fn discriminator(&self) -> &'static str {
        match self {
            Self::Vulnerability => "Vulnerability",
            Self::VulnerabilityWeb => "VulnerabilityWeb",
        }
    }

    pub fn db_label(&self) -> &'static str {
        match self {
            Self::Vulnerability => "vulnerability",
            Self::VulnerabilityWeb => "vulnerability_web",
        }
    }
}

// -- Generic row --

/// Column list selected for every vulnerability read. Expects the aliases
/// `v` (vulnerabilities), `s` (services), `h` (hosts), `u` (creator),
/// `uu` (update user) and `c` (commands).
pub const VULNERABILITY_COLUMNS: &str = "v.id, v.workspace_id, v.type, v.name, v.description, \
     v.data, v.resolution, v.severity, v.status, v.confirmed, v.ease_of_resolution, \
     v.impact_accountability, v.impact_availability, v.impact_confidentiality, \
     v.impact_integrity, v.external_id, v.tool, v.custom_fields, v.host_id, v.service_id, \
     v.creator_id, v.creator_command_id, v.method, v.path, v.parameters, v.parameter_name, \
     v.query_string, v.request, v.response, v.website, v.status_code, v.create_date, \
     v.update_date, h.id AS target_host_id, h.ip AS target_host_ip, h.os AS target_host_os, \
     u.username AS creator_username, uu.username AS update_username, \
     c.tool AS creator_command_tool";

/// Joins required by [`VULNERABILITY_COLUMNS`]. The host is reached directly
/// or through the service.
pub const VULNERABILITY_JOINS: &str = "LEFT JOIN services s ON s.id = v.service_id \
     LEFT JOIN hosts h ON h.id = COALESCE(v.host_id, s.host_id) \
     LEFT JOIN users u ON u.id = v.creator_id \
     LEFT JOIN users uu ON uu.id = v.update_user_id \
     LEFT JOIN commands c ON c.id = v.creator_command_id";

#[derive(Debug, Clone, FromRow)]
pub struct VulnerabilityRow {
    pub id: i64,
    pub workspace_id: i64,
    #[sqlx(rename = "type")]
    pub kind: VulnerabilityType,
    pub name: String,
    pub description: String,
    pub data: String,
    pub resolution: String,
    pub severity: Severity,
    pub status: VulnerabilityStatus,
    pub confirmed: bool,
    pub ease_of_resolution: Option<EaseOfResolution>,
    pub impact_accountability: bool,
    pub impact_availability: bool,
    pub impact_confidentiality: bool,
    pub impact_integrity: bool,
    pub external_id: Option<String>,
    pub tool: String,
    pub custom_fields: serde_json::Value,
    pub host_id: Option<i64>,
    pub service_id: Option<i64>,
    pub creator_id: Option<Uuid>,
    pub creator_command_id: Option<i64>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub parameters: Option<String>,
    pub parameter_name: Option<String>,
    pub query_string: Option<String>,
    pub request: Option<String>,
    pub response: Option<String>,
    pub website: Option<String>,
    pub status_code: Option<i32>,
    pub create_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
    pub target_host_id: Option<i64>,
    pub target_host_ip: Option<String>,
    pub target_host_os: Option<String>,
    pub creator_username: Option<String>,
    pub update_username: Option<String>,
    pub creator_command_tool: Option<String>,
}

// -- Domain --

/// The single parent of a vulnerability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent {
    Host(i64),
    Service(i64),
}

impl Parent {
    /// Derive the parent from the two nullable columns. Exactly one must be set.
    pub fn from_columns(host_id: Option<i64>, service_id: Option<i64>) -> Option<Self> {
        match (host_id, service_id) {
            (Some(id), None) => Some(Self::Host(id)),
            (None, Some(id)) => Some(Self::Service(id)),
            _ => None,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Host(id) | Self::Service(id) => *id,
        }
    }

    pub fn type_label(&self) -> &'static str {
        match self {
            Self::Host(_) => "Host",
            Self::Service(_) => "Service",
        }
    }

    pub fn host_id(&self) -> Option<i64> {
        match self {
            Self::Host(id) => Some(*id),
            Self::Service(_) => None,
        }
    }

    pub fn service_id(&self) -> Option<i64> {
        match self {
            Self::Service(id) => Some(*id),
            Self::Host(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Impact {
    #[serde(default)]
    pub accountability: bool,
    #[serde(default)]
    pub availability: bool,
    #[serde(default)]
    pub confidentiality: bool,
    #[serde(default)]
    pub integrity: bool,
}

/// Columns only meaningful for web vulnerabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebDetail {
    pub method: String,
    pub path: String,
    pub parameters: String,
    pub parameter_name: String,
    pub query_string: String,
    pub request: String,
    pub response: String,
    pub website: String,
    pub status_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VulnerabilityVariant {
    Standard,
    Web(WebDetail),
}

impl VulnerabilityVariant {
    pub fn kind(&self) -> VulnerabilityType {
        match self {
            Self::Standard => VulnerabilityType::Vulnerability,
            Self::Web(_) => VulnerabilityType::VulnerabilityWeb,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("vulnerability {id} violates the parent invariant")]
pub struct InvalidParent {
    pub id: i64,
}

/// Columns shared by every vulnerability kind.
#[derive(Debug, Clone)]
pub struct VulnerabilityCommon {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub description: String,
    pub data: String,
    pub resolution: String,
    pub severity: Severity,
    pub status: VulnerabilityStatus,
    pub confirmed: bool,
    pub ease_of_resolution: Option<EaseOfResolution>,
    pub impact: Impact,
    pub external_id: Option<String>,
    pub tool: String,
    pub custom_fields: serde_json::Value,
    pub parent: Parent,
    pub creator_id: Option<Uuid>,
    pub creator_username: Option<String>,
    pub update_username: Option<String>,
    pub creator_command_id: Option<i64>,
    pub creator_command_tool: Option<String>,
    pub target_host_id: Option<i64>,
    pub target_host_ip: Option<String>,
    pub target_host_os: Option<String>,
    pub create_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
}

/// A vulnerability with its parent and variant resolved.
#[derive(Debug, Clone)]
pub struct Vulnerability {
    pub common: VulnerabilityCommon,
    pub variant: VulnerabilityVariant,
}

impl TryFrom<VulnerabilityRow> for Vulnerability {
    type Error = InvalidParent;

    fn try_from(row: VulnerabilityRow) -> Result<Self, Self::Error> {
        let parent = Parent::from_columns(row.host_id, row.service_id)
            .ok_or(InvalidParent { id: row.id })?;

        let variant = match row.kind {
            VulnerabilityType::Vulnerability => VulnerabilityVariant::Standard,
            VulnerabilityType::VulnerabilityWeb => {
                if matches!(parent, Parent::Host(_)) {
                    return Err(InvalidParent { id: row.id });
                }
                VulnerabilityVariant::Web(WebDetail {
                    method: row.method.unwrap_or_default(),
                    path: row.path.unwrap_or_default(),
                    parameters: row.parameters.unwrap_or_default(),
                    parameter_name: row.parameter_name.unwrap_or_default(),
                    query_string: row.query_string.unwrap_or_default(),
                    request: row.request.unwrap_or_default(),
                    response: row.response.unwrap_or_default(),
                    website: row.website.unwrap_or_default(),
                    status_code: row.status_code,
                })
            }
        };

        let common = VulnerabilityCommon {
            id: row.id,
            workspace_id: row.workspace_id,
            name: row.name,
            description: row.description,
            data: row.data,
            resolution: row.resolution,
            severity: row.severity,
            status: row.status,
            confirmed: row.confirmed,
            ease_of_resolution: row.ease_of_resolution,
            impact: Impact {
                accountability: row.impact_accountability,
                availability: row.impact_availability,
                confidentiality: row.impact_confidentiality,
                integrity: row.impact_integrity,
            },
            external_id: row.external_id,
            tool: row.tool,
            custom_fields: row.custom_fields,
            parent,
            creator_id: row.creator_id,
            creator_username: row.creator_username,
            update_username: row.update_username,
            creator_command_id: row.creator_command_id,
            creator_command_tool: row.creator_command_tool,
            target_host_id: row.target_host_id,
            target_host_ip: row.target_host_ip,
            target_host_os: row.target_host_os,
            create_date: row.create_date,
            update_date: row.update_date,
        };

        Ok(Self { common, variant })
    }
}

impl Vulnerability {
    pub fn id(&self) -> i64 {
        self.common.id
    }

    pub fn kind(&self) -> VulnerabilityType {
        self.variant.kind()
    }

    /// Name shown as the creator: explicit tool, then the command tool, then the UI.
    pub fn creator_label(&self) -> String {
        if !self.common.tool.is_empty() {
            return self.common.tool.clone();
        }
        self.common
            .creator_command_tool
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Web UI".to_string())
    }
}

// -- Wire shapes --

#[derive(Debug, Clone, Serialize)]
pub struct VulnerabilityMetadata {
    pub command_id: Option<i64>,
    pub creator: String,
    pub owner: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub update_user: Option<String>,
}

/// Web-only fields, flattened into [`VulnerabilityView`] for web rows.
#[derive(Debug, Clone, Serialize)]
pub struct WebView {
    pub method: String,
    pub params: String,
    pub pname: String,
    pub path: String,
    pub response: String,
    pub request: String,
    pub website: String,
    pub query: String,
    pub status_code: Option<i32>,
}

impl From<&WebDetail> for WebView {
    fn from(w: &WebDetail) -> Self {
        Self {
            method: w.method.clone(),
            params: w.parameters.clone(),
            pname: w.parameter_name.clone(),
            path: w.path.clone(),
            response: w.response.clone(),
            request: w.request.clone(),
            website: w.website.clone(),
            query: w.query_string.clone(),
            status_code: w.status_code,
        }
    }
}

/// Serialized vulnerability as returned by every read endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct VulnerabilityView {
    #[serde(rename = "_id")]
    pub id: i64,
    #[serde(rename = "_rev")]
    pub rev: String,
    #[serde(rename = "_attachments")]
    pub attachments: BTreeMap<String, EvidenceView>,
    pub owned: bool,
    pub owner: Option<String>,
    pub impact: Impact,
    pub desc: String,
    pub description: String,
    pub policyviolations: Vec<String>,
    pub refs: Vec<String>,
    pub owasp: Vec<String>,
    pub cve: Vec<String>,
    pub cwe: Vec<String>,
    pub cvss: Vec<String>,
    pub issuetracker: serde_json::Value,
    pub tool: String,
    pub parent: i64,
    pub parent_type: String,
    pub tags: Vec<String>,
    pub easeofresolution: Option<EaseOfResolution>,
    pub hostnames: Vec<String>,
    pub service: Option<ServiceSummary>,
    pub host: Option<i64>,
    pub severity: Severity,
    pub status: VulnerabilityStatus,
    #[serde(rename = "type")]
    pub kind: VulnerabilityType,
    pub obj_id: String,
    pub target: Option<String>,
    pub host_os: Option<String>,
    pub metadata: VulnerabilityMetadata,
    pub date: DateTime<Utc>,
    pub custom_fields: serde_json::Value,
    pub external_id: Option<String>,
    pub name: String,
    pub data: String,
    pub resolution: String,
    pub confirmed: bool,
    #[serde(flatten)]
    pub web: Option<WebView>,
}

/// Parent id as sent by clients: a number or a numeric string.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ParentRef {
    Id(i64),
    Text(String),
}

impl ParentRef {
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Create/update request body. Read-only fields of [`VulnerabilityView`] are
/// accepted and ignored, so a serialized vulnerability can be posted back.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VulnerabilityPayload {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub name: Option<String>,
    pub desc: Option<String>,
    pub data: Option<String>,
    pub resolution: Option<String>,
    pub severity: Option<Severity>,
    pub status: Option<VulnerabilityStatus>,
    pub confirmed: Option<bool>,
    pub easeofresolution: Option<EaseOfResolution>,
    pub impact: Option<Impact>,
    pub external_id: Option<String>,
    pub tool: Option<String>,
    pub custom_fields: Option<serde_json::Map<String, serde_json::Value>>,
    pub refs: Option<Vec<String>>,
    pub policyviolations: Option<Vec<String>>,
    pub cve: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub parent: Option<ParentRef>,
    pub parent_type: Option<String>,
    pub host_id: Option<i64>,
    pub service_id: Option<i64>,
    pub command_id: Option<i64>,
    #[serde(rename = "_attachments")]
    pub attachments: Option<BTreeMap<String, AttachmentPayload>>,

    // web
    pub method: Option<String>,
    pub params: Option<String>,
    pub pname: Option<String>,
    pub path: Option<String>,
    pub request: Option<String>,
    pub response: Option<String>,
    pub website: Option<String>,
    pub query: Option<String>,
    pub status_code: Option<i32>,
}

impl VulnerabilityPayload {
    /// Whether any web-only field was supplied.
    pub fn has_web_fields(&self) -> bool {
        self.method.is_some()
            || self.params.is_some()
            || self.pname.is_some()
            || self.path.is_some()
            || self.request.is_some()
            || self.response.is_some()
            || self.website.is_some()
            || self.query.is_some()
            || self.status_code.is_some()
    }
}

/// Query string of `GET /vulns`. Every value arrives as text and is coerced
/// the same way filter values are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub severity: Option<String>,
    pub status: Option<String>,
    pub confirmed: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub service_id: Option<String>,
    pub command_id: Option<String>,
    pub target: Option<String>,
    pub ease_of_resolution: Option<String>,
    pub status_code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub path: Option<String>,
    pub creator: Option<String>,
    pub service: Option<String>,
    pub hostnames: Option<String>,
    pub search: Option<String>,
    pub get_evidence: Option<String>,
}

impl ListParams {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            page_size: self.page_size,
        }
    }

    /// `(field, value)` pairs matched exactly.
    pub fn exact_filters(&self) -> Vec<(&'static str, &str)> {
        [
            ("severity", &self.severity),
            ("status", &self.status),
            ("confirmed", &self.confirmed),
            ("type", &self.kind),
            ("service_id", &self.service_id),
            ("command_id", &self.command_id),
            ("target", &self.target),
            ("ease_of_resolution", &self.ease_of_resolution),
            ("status_code", &self.status_code),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.as_deref().map(|v| (field, v)))
        .collect()
    }

    /// `(field, value)` pairs matched as case-insensitive substrings.
    pub fn partial_filters(&self) -> Vec<(&'static str, &str)> {
        [
            ("name", &self.name),
            ("description", &self.description),
            ("website", &self.website),
            ("path", &self.path),
            ("creator", &self.creator),
            ("service", &self.service),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.as_deref().map(|v| (field, v)))
        .collect()
    }

    /// Comma-separated hostnames, trimmed, empties dropped.
    pub fn hostname_list(&self) -> Vec<String> {
        self.hostnames
            .as_deref()
            .map(|h| {
                h.split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn with_evidence(&self) -> bool {
        self.get_evidence
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: VulnerabilityType, host_id: Option<i64>, service_id: Option<i64>) -> VulnerabilityRow {
        VulnerabilityRow {
            id: 1,
            workspace_id: 1,
            kind,
            name: "SQL Injection".to_string(),
            description: "desc".to_string(),
            data: String::new(),
            resolution: String::new(),
            severity: Severity::High,
            status: VulnerabilityStatus::Open,
            confirmed: false,
            ease_of_resolution: None,
            impact_accountability: false,
            impact_availability: true,
            impact_confidentiality: false,
            impact_integrity: false,
            external_id: None,
            tool: String::new(),
            custom_fields: serde_json::json!({}),
            host_id,
            service_id,
            creator_id: None,
            creator_command_id: None,
            method: Some("POST".to_string()),
            path: Some("/login".to_string()),
            parameters: None,
            parameter_name: None,
            query_string: None,
            request: None,
            response: None,
            website: None,
            status_code: Some(500),
            create_date: Utc::now(),
            update_date: Utc::now(),
            target_host_id: host_id,
            target_host_ip: Some("10.0.0.1".to_string()),
            target_host_os: Some("Linux".to_string()),
            creator_username: None,
            update_username: None,
            creator_command_tool: None,
        }
    }

    #[test]
    fn severity_serializes_short_labels() {
        assert_eq!(serde_json::to_string(&Severity::Informational).unwrap(), "\"info\"");
        assert_eq!(serde_json::to_string(&Severity::Medium).unwrap(), "\"med\"");
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
    }

    #[test]
    fn severity_accepts_long_labels() {
        let s: Severity = serde_json::from_str("\"informational\"").unwrap();
        assert_eq!(s, Severity::Informational);
        let s: Severity = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(s, Severity::Medium);
        assert_eq!(Severity::from_label("MED"), Some(Severity::Medium));
        assert_eq!(Severity::from_label("unknown"), None);
    }

    #[test]
    fn status_maps_legacy_opened() {
        let s: VulnerabilityStatus = serde_json::from_str("\"opened\"").unwrap();
        assert_eq!(s, VulnerabilityStatus::Open);
        assert_eq!(VulnerabilityStatus::from_label("opened"), Some(VulnerabilityStatus::Open));
        assert_eq!(
            serde_json::to_string(&VulnerabilityStatus::RiskAccepted).unwrap(),
            "\"risk-accepted\""
        );
    }

    #[test]
    fn discriminator_resolution() {
        assert_eq!(
            VulnerabilityType::from_discriminator("VulnerabilityWeb"),
            Some(VulnerabilityType::VulnerabilityWeb)
        );
        assert_eq!(VulnerabilityType::from_discriminator("vulnerability"), None);
        assert_eq!(VulnerabilityType::VulnerabilityWeb.db_label(), "vulnerability_web");
    }

    #[test]
    fn parent_requires_exactly_one_column() {
        assert_eq!(Parent::from_columns(Some(3), None), Some(Parent::Host(3)));
        assert_eq!(Parent::from_columns(None, Some(4)), Some(Parent::Service(4)));
        assert_eq!(Parent::from_columns(Some(3), Some(4)), None);
        assert_eq!(Parent::from_columns(None, None), None);
    }

    #[test]
    fn standard_row_ignores_web_columns() {
        let vuln = Vulnerability::try_from(row(VulnerabilityType::Vulnerability, Some(2), None)).unwrap();
        assert_eq!(vuln.variant, VulnerabilityVariant::Standard);
        assert_eq!(vuln.common.parent, Parent::Host(2));
        assert!(vuln.common.impact.availability);
    }

    #[test]
    fn web_row_builds_detail() {
        let vuln =
            Vulnerability::try_from(row(VulnerabilityType::VulnerabilityWeb, None, Some(9))).unwrap();
        match vuln.variant {
            VulnerabilityVariant::Web(ref detail) => {
                assert_eq!(detail.method, "POST");
                assert_eq!(detail.status_code, Some(500));
                assert_eq!(detail.website, "");
            }
            VulnerabilityVariant::Standard => panic!("expected web variant"),
        }
        assert_eq!(vuln.kind(), VulnerabilityType::VulnerabilityWeb);
    }

    #[test]
    fn web_row_with_host_parent_is_rejected() {
        let err = Vulnerability::try_from(row(VulnerabilityType::VulnerabilityWeb, Some(1), None))
            .unwrap_err();
        assert_eq!(err.id, 1);
    }

    #[test]
    fn creator_label_fallbacks() {
        let mut vuln =
            Vulnerability::try_from(row(VulnerabilityType::Vulnerability, Some(2), None)).unwrap();
        assert_eq!(vuln.creator_label(), "Web UI");
        vuln.common.creator_command_tool = Some("nmap".to_string());
        assert_eq!(vuln.creator_label(), "nmap");
        vuln.common.tool = "burp".to_string();
        assert_eq!(vuln.creator_label(), "burp");
    }

    #[test]
    fn parent_ref_accepts_numeric_strings() {
        let p: ParentRef = serde_json::from_str("\"12\"").unwrap();
        assert_eq!(p.id(), Some(12));
        let p: ParentRef = serde_json::from_str("5").unwrap();
        assert_eq!(p.id(), Some(5));
        let p: ParentRef = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(p.id(), None);
    }

    #[test]
    fn payload_ignores_read_only_fields() {
        let payload: VulnerabilityPayload = serde_json::from_value(serde_json::json!({
            "type": "Vulnerability",
            "name": "XSS",
            "severity": "med",
            "parent": 1,
            "parent_type": "Host",
            "owner": "admin",
            "hostnames": ["a.com"],
            "metadata": {"creator": "Web UI"}
        }))
        .unwrap();
        assert_eq!(payload.severity, Some(Severity::Medium));
        assert!(!payload.has_web_fields());
    }

    #[test]
    fn list_params_split_filters() {
        let params: ListParams = serde_json::from_value(serde_json::json!({
            "severity": "high",
            "type": "VulnerabilityWeb",
            "name": "sql",
            "hostnames": "a.com, ,b.com",
            "get_evidence": "true"
        }))
        .unwrap();
        assert_eq!(
            params.exact_filters(),
            vec![("severity", "high"), ("type", "VulnerabilityWeb")]
        );
        assert_eq!(params.partial_filters(), vec![("name", "sql")]);
        assert_eq!(params.hostname_list(), vec!["a.com", "b.com"]);
        assert!(params.with_evidence());
        assert_eq!(params.pagination().limit(), 100);
    }
}

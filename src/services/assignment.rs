//! Column assignments shared by full update, partial update and bulk update.
//!
//! Every writable vulnerability attribute is listed in [`ASSIGNABLE`]. Bulk
//! bodies are checked against it; typed payloads are lowered to the same
//! [`Assignment`] list so all three update paths render one `SET` clause.

use serde_json::{Map, Value};
use sqlx::{Postgres, Transaction};

use crate::errors::AppError;
use crate::filters::fields::FieldKind;
use crate::filters::translate::Params;
use crate::filters::value::{self, SqlValue};
use crate::models::custom_field::CustomFieldSchema;
use crate::models::vulnerability::{VulnerabilityPayload, VulnerabilityType};
use crate::services::{custom_fields, references};

/// Keys silently ignored by bulk update.
pub const NEVER_MASS_ASSIGNED: [&str; 7] = [
    "type",
    "tool",
    "host_id",
    "service_id",
    "parent",
    "parent_type",
    "_attachments",
];

struct AssignableField {
    names: &'static [&'static str],
    column: &'static str,
    kind: FieldKind,
    nullable: bool,
    web_only: bool,
}

const fn field(
    names: &'static [&'static str],
    column: &'static str,
    kind: FieldKind,
    nullable: bool,
    web_only: bool,
) -> AssignableField {
    AssignableField {
        names,
        column,
        kind,
        nullable,
        web_only,
    }
}

const ASSIGNABLE: &[AssignableField] = &[
    field(&["name"], "name", FieldKind::Text, false, false),
    field(&["desc", "description"], "description", FieldKind::Text, false, false),
    field(&["data"], "data", FieldKind::Text, false, false),
    field(&["resolution"], "resolution", FieldKind::Text, false, false),
    field(&["severity"], "severity", FieldKind::Severity, false, false),
    field(&["status"], "status", FieldKind::Status, false, false),
    field(&["confirmed"], "confirmed", FieldKind::Boolean, false, false),
    field(
        &["easeofresolution", "ease_of_resolution"],
        "ease_of_resolution",
        FieldKind::EaseOfResolution,
        true,
        false,
    ),
    field(&["external_id"], "external_id", FieldKind::Text, true, false),
    field(&["method"], "method", FieldKind::Text, false, true),
    field(&["params", "parameters"], "parameters", FieldKind::Text, false, true),
    field(&["pname", "parameter_name"], "parameter_name", FieldKind::Text, false, true),
    field(&["path"], "path", FieldKind::Text, false, true),
    field(&["request"], "request", FieldKind::Text, false, true),
    field(&["response"], "response", FieldKind::Text, false, true),
    field(&["website"], "website", FieldKind::Text, false, true),
    field(&["query", "query_string"], "query_string", FieldKind::Text, false, true),
    field(&["status_code"], "status_code", FieldKind::Integer, true, true),
];

const IMPACT_KEYS: [(&str, &str); 4] = [
    ("accountability", "impact_accountability"),
    ("availability", "impact_availability"),
    ("confidentiality", "impact_confidentiality"),
    ("integrity", "impact_integrity"),
];

fn lookup(name: &str) -> Option<&'static AssignableField> {
    ASSIGNABLE.iter().find(|f| f.names.contains(&name))
}

fn sql_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "text",
        FieldKind::Integer => "integer",
        FieldKind::Boolean => "boolean",
        FieldKind::Timestamp => "timestamptz",
        other => other.pg_enum().unwrap_or("text"),
    }
}

/// One `column = value` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: &'static str,
    pub cast: &'static str,
    pub value: SqlValue,
    /// Only applied to web rows; standard rows keep their value.
    pub web_only: bool,
}

impl Assignment {
    fn new(column: &'static str, cast: &'static str, value: SqlValue) -> Self {
        Self {
            column,
            cast,
            value,
            web_only: false,
        }
    }
}

/// Render `col = $n::type, ...`, registering values in `params`.
pub fn render_set(assignments: &[Assignment], params: &mut Params) -> String {
    assignments
        .iter()
        .map(|a| {
            let ph = params.push(a.value.clone());
            let col = a.column;
            let expr = format!("{ph}::{}", a.cast);
            if a.web_only {
                format!("{col} = CASE WHEN type = 'vulnerability_web' THEN {expr} ELSE {col} END")
            } else {
                format!("{col} = {expr}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Relationship lists set row by row after the column update.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProxyFields {
    pub tags: Option<Vec<String>>,
    pub refs: Option<Vec<String>>,
    pub policy_violations: Option<Vec<String>>,
    pub cves: Option<Vec<String>>,
}

impl ProxyFields {
    pub fn from_payload(payload: &VulnerabilityPayload) -> Self {
        Self {
            tags: payload.tags.clone(),
            refs: payload.refs.clone(),
            policy_violations: payload.policyviolations.clone(),
            cves: payload.cve.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_none()
            && self.refs.is_none()
            && self.policy_violations.is_none()
            && self.cves.is_none()
    }

    /// Write the present lists for one vulnerability.
    pub async fn apply(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        vuln_id: i64,
    ) -> Result<(), AppError> {
        if let Some(tags) = &self.tags {
            references::replace_tags(tx, vuln_id, tags).await?;
        }
        if let Some(cves) = &self.cves {
            references::replace_cves(tx, vuln_id, cves).await?;
        }
        // After CVEs, so ids found in references are added rather than wiped.
        if let Some(refs) = &self.refs {
            references::replace_references(tx, vuln_id, refs).await?;
        }
        if let Some(pvs) = &self.policy_violations {
            references::replace_policy_violations(tx, vuln_id, pvs).await?;
        }
        Ok(())
    }
}

/// Parsed body of `PATCH /vulns`.
#[derive(Debug, Default)]
pub struct BulkChanges {
    pub ids: Vec<i64>,
    pub assignments: Vec<Assignment>,
    pub proxies: ProxyFields,
}

fn string_list(key: &str, value: &Value) -> Result<Vec<String>, AppError> {
    value
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| AppError::Validation(format!("'{key}' must be a list of strings")))
}

/// Split a bulk update body into column assignments and proxy fields.
pub fn parse_bulk_changes(
    body: &Map<String, Value>,
    schema: &[CustomFieldSchema],
) -> Result<BulkChanges, AppError> {
    let mut changes = BulkChanges::default();

    for (key, val) in body {
        match key.as_str() {
            "ids" => {
                changes.ids = val
                    .as_array()
                    .and_then(|ids| ids.iter().map(Value::as_i64).collect::<Option<Vec<_>>>())
                    .ok_or_else(|| AppError::Validation("'ids' must be a list of integers".to_string()))?;
            }
            k if NEVER_MASS_ASSIGNED.contains(&k) => {
                tracing::debug!(field = %k, "Ignoring non mass-assignable field");
            }
            "tags" => changes.proxies.tags = Some(string_list(key, val)?),
            "refs" => changes.proxies.refs = Some(string_list(key, val)?),
            "policyviolations" => changes.proxies.policy_violations = Some(string_list(key, val)?),
            "cve" => changes.proxies.cves = Some(string_list(key, val)?),
            "impact" => {
                let impact = val
                    .as_object()
                    .ok_or_else(|| AppError::Validation("'impact' must be an object".to_string()))?;
                for (flag, column) in IMPACT_KEYS {
                    if let Some(v) = impact.get(flag) {
                        let b = value::parse_bool(v).ok_or_else(|| {
                            AppError::Validation(format!("impact.{flag} must be a boolean"))
                        })?;
                        changes
                            .assignments
                            .push(Assignment::new(column, "boolean", SqlValue::Bool(b)));
                    }
                }
            }
            "custom_fields" => {
                let input = val.as_object().cloned().ok_or_else(|| {
                    AppError::Validation("'custom_fields' must be an object".to_string())
                })?;
                let sanitized = custom_fields::sanitize(schema, input)?;
                changes
                    .assignments
                    .push(Assignment::new("custom_fields", "jsonb", SqlValue::Json(sanitized)));
            }
            other => {
                let f = lookup(other)
                    .ok_or_else(|| AppError::Validation(format!("Unknown field: {other}")))?;
                changes.assignments.push(assign_json(f, other, val)?);
            }
        }
    }

    if changes.ids.is_empty() {
        return Err(AppError::Validation("'ids' must not be empty".to_string()));
    }
    Ok(changes)
}

fn assign_json(f: &'static AssignableField, key: &str, val: &Value) -> Result<Assignment, AppError> {
    let value = if val.is_null() {
        if !f.nullable {
            return Err(AppError::Validation(format!("'{key}' may not be null")));
        }
        SqlValue::Null
    } else {
        value::coerce(key, f.kind, val).map_err(|e| AppError::Validation(e.to_string()))?
    };
    Ok(Assignment {
        column: f.column,
        cast: sql_type(f.kind),
        value,
        web_only: f.web_only,
    })
}

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

/// Lower a typed payload to assignments.
///
/// With `full` set (PUT) absent fields are reset to their defaults; otherwise
/// (PATCH) only present fields are assigned. Web columns are only touched for
/// web vulnerabilities.
pub fn from_payload(
    payload: &VulnerabilityPayload,
    kind: VulnerabilityType,
    full: bool,
    custom_fields: Option<Value>,
) -> Result<Vec<Assignment>, AppError> {
    let mut out = Vec::new();
    let mut push = |column: &'static str, cast: &'static str, value: Option<SqlValue>, default: SqlValue| {
        match value {
            Some(v) => out.push(Assignment::new(column, cast, v)),
            None if full => out.push(Assignment::new(column, cast, default)),
            None => {}
        }
    };

    if full && payload.name.is_none() {
        return Err(AppError::Validation("Missing field: name".to_string()));
    }
    if full && payload.severity.is_none() {
        return Err(AppError::Validation("Missing field: severity".to_string()));
    }
    if let Some(name) = &payload.name {
        if name.trim().is_empty() {
            return Err(AppError::Validation("Field 'name' may not be empty".to_string()));
        }
    }

    push("name", "text", payload.name.as_deref().map(text), text(""));
    push("description", "text", payload.desc.as_deref().map(text), text(""));
    push("data", "text", payload.data.as_deref().map(text), text(""));
    push("resolution", "text", payload.resolution.as_deref().map(text), text(""));
    push(
        "severity",
        "severity_level",
        payload.severity.map(|s| text(s.db_label())),
        text("informational"),
    );
    push(
        "status",
        "vulnerability_status",
        payload.status.map(|s| text(s.label())),
        text("open"),
    );
    push(
        "confirmed",
        "boolean",
        payload.confirmed.map(SqlValue::Bool),
        SqlValue::Bool(false),
    );
    push(
        "ease_of_resolution",
        "ease_of_resolution",
        payload.easeofresolution.map(|e| text(e.label())),
        SqlValue::Null,
    );
    push(
        "external_id",
        "text",
        payload.external_id.as_deref().map(text),
        SqlValue::Null,
    );
    if let Some(impact) = payload.impact {
        let flags = [
            impact.accountability,
            impact.availability,
            impact.confidentiality,
            impact.integrity,
        ];
        for ((_, column), flag) in IMPACT_KEYS.into_iter().zip(flags) {
            push(column, "boolean", Some(SqlValue::Bool(flag)), SqlValue::Bool(false));
        }
    } else {
        for (_, column) in IMPACT_KEYS {
            push(column, "boolean", None, SqlValue::Bool(false));
        }
    }
    push(
        "custom_fields",
        "jsonb",
        custom_fields.map(SqlValue::Json),
        SqlValue::Json(Value::Object(Map::new())),
    );

    if kind == VulnerabilityType::VulnerabilityWeb {
        push("method", "text", payload.method.as_deref().map(text), text(""));
        push("parameters", "text", payload.params.as_deref().map(text), text(""));
        push("parameter_name", "text", payload.pname.as_deref().map(text), text(""));
        push("path", "text", payload.path.as_deref().map(text), text(""));
        push("request", "text", payload.request.as_deref().map(text), text(""));
        push("response", "text", payload.response.as_deref().map(text), text(""));
        push("website", "text", payload.website.as_deref().map(text), text(""));
        push("query_string", "text", payload.query.as_deref().map(text), text(""));
        push(
            "status_code",
            "integer",
            payload.status_code.map(|c| SqlValue::Int(c as i64)),
            SqlValue::Null,
        );
    }

    Ok(out)
}

/// Column values for an INSERT. Standard rows leave the web columns NULL.
pub fn insert_values(
    payload: &VulnerabilityPayload,
    kind: VulnerabilityType,
    custom_fields: Value,
) -> Result<Vec<Assignment>, AppError> {
    from_payload(payload, kind, true, Some(custom_fields))
}

//! Vulnerability service: create, read, update, delete, listing, bulk
//! operations and statistics.

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::bind_params;
use crate::errors::AppError;
use crate::filters::translate::Params;
use crate::filters::value::SqlValue;
use crate::filters::{FilterNode, FilterQuery, Predicate};
use crate::models::attachment::EvidenceView;
use crate::models::host::{Hostname, Service, ServiceSummary};
use crate::models::user::TopUser;
use crate::models::vulnerability::{
    ListParams, Parent, Severity, Vulnerability, VulnerabilityMetadata, VulnerabilityPayload,
    VulnerabilityRow, VulnerabilityType, VulnerabilityVariant, VulnerabilityView, WebView,
    VULNERABILITY_COLUMNS, VULNERABILITY_JOINS,
};
use crate::models::workspace::Workspace;
use crate::services::assignment::{self, Assignment, ProxyFields};
use crate::services::filter::{self, FilterOutcome};
use crate::services::references::{self, NameLists};
use crate::services::storage::Depot;
use crate::services::{attachment, custom_fields};

/// Tool recorded when neither the payload nor a command names one.
pub const WEB_UI_TOOL: &str = "Web UI";

// -- Type and parent resolution --

/// Resolve the `type` discriminator of a create payload.
pub fn resolve_kind(kind: Option<&str>) -> Result<VulnerabilityType, AppError> {
    let kind = kind
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::BadRequest("Type is required.".to_string()))?;
    VulnerabilityType::from_discriminator(kind)
        .ok_or_else(|| AppError::BadRequest("Invalid vulnerability type.".to_string()))
}

/// Reject web-only fields on a standard vulnerability.
pub fn check_fields(
    kind: VulnerabilityType,
    payload: &VulnerabilityPayload,
) -> Result<(), AppError> {
    if kind == VulnerabilityType::Vulnerability && payload.has_web_fields() {
        return Err(AppError::BadRequest(
            "Web fields are not valid for Vulnerability".to_string(),
        ));
    }
    Ok(())
}

/// Parent requested by a payload, before it is checked against the database.
fn requested_parent(
    kind: VulnerabilityType,
    payload: &VulnerabilityPayload,
) -> Result<Option<Parent>, AppError> {
    // The shorthand key must be the variant's own parent column.
    match kind {
        VulnerabilityType::Vulnerability if payload.service_id.is_some() => {
            return Err(AppError::BadRequest(
                "'service_id' is not a valid field for Vulnerability".to_string(),
            ));
        }
        VulnerabilityType::VulnerabilityWeb if payload.host_id.is_some() => {
            return Err(AppError::BadRequest(
                "'host_id' is not a valid field for VulnerabilityWeb".to_string(),
            ));
        }
        _ => {}
    }

    let parent = if let Some(parent) = &payload.parent {
        let id = parent
            .id()
            .ok_or_else(|| AppError::Validation("Parent id must be an integer".to_string()))?;
        match payload.parent_type.as_deref() {
            Some("Host") => Parent::Host(id),
            Some("Service") => Parent::Service(id),
            _ => return Err(AppError::Validation("Unknown parent type".to_string())),
        }
    } else if let Some(id) = payload.host_id {
        Parent::Host(id)
    } else if let Some(id) = payload.service_id {
        Parent::Service(id)
    } else {
        return Ok(None);
    };

    if kind == VulnerabilityType::VulnerabilityWeb && matches!(parent, Parent::Host(_)) {
        return Err(AppError::Validation(
            "Trying to set a host for a vulnerability web".to_string(),
        ));
    }
    Ok(Some(parent))
}

/// Check that the parent exists in the workspace.
async fn check_parent(pool: &PgPool, workspace_id: i64, parent: Parent) -> Result<Parent, AppError> {
    let table = match parent {
        Parent::Host(_) => "hosts",
        Parent::Service(_) => "services",
    };
    let found = sqlx::query_scalar::<_, bool>(&format!(
        "SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1 AND workspace_id = $2)"
    ))
    .bind(parent.id())
    .bind(workspace_id)
    .fetch_one(pool)
    .await?;
    if !found {
        return Err(AppError::Validation(format!(
            "Parent id not found: {}",
            parent.id()
        )));
    }
    Ok(parent)
}

async fn resolve_parent(
    pool: &PgPool,
    workspace_id: i64,
    kind: VulnerabilityType,
    payload: &VulnerabilityPayload,
) -> Result<Option<Parent>, AppError> {
    match requested_parent(kind, payload)? {
        Some(parent) => check_parent(pool, workspace_id, parent).await.map(Some),
        None => Ok(None),
    }
}

async fn command_tool(
    pool: &PgPool,
    workspace_id: i64,
    command_id: i64,
) -> Result<String, AppError> {
    sqlx::query_scalar::<_, String>("SELECT tool FROM commands WHERE id = $1 AND workspace_id = $2")
        .bind(command_id)
        .bind(workspace_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::Validation(format!("Command id not found: {command_id}")))
}

fn nullable_int(value: Option<i64>) -> SqlValue {
    value.map(SqlValue::Int).unwrap_or(SqlValue::Null)
}

fn parent_assignments(parent: Parent) -> [Assignment; 2] {
    [
        Assignment {
            column: "host_id",
            cast: "bigint",
            value: nullable_int(parent.host_id()),
            web_only: false,
        },
        Assignment {
            column: "service_id",
            cast: "bigint",
            value: nullable_int(parent.service_id()),
            web_only: false,
        },
    ]
}

// -- Reads --

/// Load one vulnerability of the workspace. Ids of other workspaces are
/// reported as missing.
pub async fn find(pool: &PgPool, workspace_id: i64, id: i64) -> Result<Vulnerability, AppError> {
    let row = sqlx::query_as::<_, VulnerabilityRow>(&format!(
        "SELECT {VULNERABILITY_COLUMNS} FROM vulnerabilities v {VULNERABILITY_JOINS} \
         WHERE v.workspace_id = $1 AND v.id = $2"
    ))
    .bind(workspace_id)
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Vulnerability not found".to_string()))?;

    Vulnerability::try_from(row).map_err(|e| AppError::Internal(e.to_string()))
}

/// Fail with not-found unless the vulnerability exists in the workspace.
pub async fn ensure_exists(pool: &PgPool, workspace_id: i64, id: i64) -> Result<(), AppError> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM vulnerabilities WHERE workspace_id = $1 AND id = $2)",
    )
    .bind(workspace_id)
    .bind(id)
    .fetch_one(pool)
    .await?;
    if exists {
        Ok(())
    } else {
        Err(AppError::NotFound("Vulnerability not found".to_string()))
    }
}

/// Related collections of a page of vulnerabilities.
#[derive(Debug, Default)]
pub struct Related {
    pub names: NameLists,
    pub hostnames: HashMap<i64, Vec<String>>,
    pub services: HashMap<i64, ServiceSummary>,
    pub evidence: HashMap<i64, BTreeMap<String, EvidenceView>>,
}

async fn load_hostnames(pool: &PgPool, host_ids: &[i64]) -> Result<HashMap<i64, Vec<String>>, AppError> {
    let mut map: HashMap<i64, Vec<String>> = HashMap::new();
    if host_ids.is_empty() {
        return Ok(map);
    }
    let rows = sqlx::query_as::<_, Hostname>(
        "SELECT host_id, name FROM hostnames WHERE host_id = ANY($1) ORDER BY name",
    )
    .bind(host_ids)
    .fetch_all(pool)
    .await?;
    for row in rows {
        map.entry(row.host_id).or_default().push(row.name);
    }
    Ok(map)
}

async fn load_services(
    pool: &PgPool,
    service_ids: &[i64],
) -> Result<HashMap<i64, ServiceSummary>, AppError> {
    if service_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query_as::<_, Service>(
        "SELECT id, host_id, workspace_id, name, port, protocol, status, version \
         FROM services WHERE id = ANY($1)",
    )
    .bind(service_ids)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|s| (s.id, ServiceSummary::from(s))).collect())
}

/// Load every related collection of `vulns` with one query per collection.
pub async fn load_related(
    pool: &PgPool,
    depot: &Depot,
    vulns: &[Vulnerability],
    with_evidence: bool,
) -> Result<Related, AppError> {
    let ids: Vec<i64> = vulns.iter().map(Vulnerability::id).collect();
    let mut host_ids: Vec<i64> = vulns.iter().filter_map(|v| v.common.target_host_id).collect();
    host_ids.sort_unstable();
    host_ids.dedup();
    let mut service_ids: Vec<i64> = vulns
        .iter()
        .filter_map(|v| v.common.parent.service_id())
        .collect();
    service_ids.sort_unstable();
    service_ids.dedup();

    let (names, hostnames, services) = tokio::try_join!(
        references::load(pool, &ids),
        load_hostnames(pool, &host_ids),
        load_services(pool, &service_ids),
    )?;
    let evidence = if with_evidence {
        attachment::evidence_for(pool, depot, &ids).await?
    } else {
        HashMap::new()
    };

    Ok(Related {
        names,
        hostnames,
        services,
        evidence,
    })
}

fn list_of(map: &HashMap<i64, Vec<String>>, id: i64) -> Vec<String> {
    map.get(&id).cloned().unwrap_or_default()
}

/// Serialize one vulnerability with its related collections.
pub fn to_view(vuln: &Vulnerability, related: &Related) -> VulnerabilityView {
    let c = &vuln.common;
    let refs = list_of(&related.names.refs, c.id);
    let classified = references::classify(&refs);

    VulnerabilityView {
        id: c.id,
        rev: String::new(),
        attachments: related.evidence.get(&c.id).cloned().unwrap_or_default(),
        owned: false,
        owner: c.creator_username.clone(),
        impact: c.impact,
        desc: c.description.clone(),
        description: c.description.clone(),
        policyviolations: list_of(&related.names.policy_violations, c.id),
        refs,
        owasp: classified.owasp,
        cve: list_of(&related.names.cves, c.id),
        cwe: classified.cwe,
        cvss: classified.cvss,
        issuetracker: json!({}),
        tool: c.tool.clone(),
        parent: c.parent.id(),
        parent_type: c.parent.type_label().to_string(),
        tags: list_of(&related.names.tags, c.id),
        easeofresolution: c.ease_of_resolution,
        hostnames: c
            .target_host_id
            .map(|h| list_of(&related.hostnames, h))
            .unwrap_or_default(),
        service: c
            .parent
            .service_id()
            .and_then(|s| related.services.get(&s).cloned()),
        host: c.target_host_id,
        severity: c.severity,
        status: c.status,
        kind: vuln.kind(),
        obj_id: c.id.to_string(),
        target: c.target_host_ip.clone(),
        host_os: c.target_host_os.clone(),
        metadata: VulnerabilityMetadata {
            command_id: c.creator_command_id,
            creator: vuln.creator_label(),
            owner: c.creator_username.clone(),
            create_time: c.create_date,
            update_time: c.update_date,
            update_user: c.update_username.clone(),
        },
        date: c.create_date,
        custom_fields: c.custom_fields.clone(),
        external_id: c.external_id.clone(),
        name: c.name.clone(),
        data: c.data.clone(),
        resolution: c.resolution.clone(),
        confirmed: c.confirmed,
        web: match &vuln.variant {
            VulnerabilityVariant::Web(detail) => Some(WebView::from(detail)),
            VulnerabilityVariant::Standard => None,
        },
    }
}

/// Serialize a page of vulnerabilities.
pub async fn render(
    pool: &PgPool,
    depot: &Depot,
    vulns: &[Vulnerability],
    with_evidence: bool,
) -> Result<Vec<VulnerabilityView>, AppError> {
    let related = load_related(pool, depot, vulns, with_evidence).await?;
    Ok(vulns.iter().map(|v| to_view(v, &related)).collect())
}

/// `GET /vulns/{id}`.
pub async fn get(
    pool: &PgPool,
    depot: &Depot,
    workspace: &Workspace,
    id: i64,
) -> Result<VulnerabilityView, AppError> {
    let vuln = find(pool, workspace.id, id).await?;
    let mut views = render(pool, depot, std::slice::from_ref(&vuln), true).await?;
    views
        .pop()
        .ok_or_else(|| AppError::Internal("rendering produced no view".to_string()))
}

/// Lower the simple query-string filters of `GET /vulns` into a filter document.
pub fn list_query(params: &ListParams) -> FilterQuery {
    let mut query = FilterQuery::default();

    for (field, value) in params.exact_filters() {
        query.push(Predicate::new(field, "==", Value::String(value.to_string())));
    }
    for (field, value) in params.partial_filters() {
        query.push(Predicate::new(field, "ilike", Value::String(format!("%{value}%"))));
    }
    if let Some(term) = params.search.as_deref().filter(|t| !t.is_empty()) {
        let pattern = Value::String(format!("%{term}%"));
        query.filters.push(FilterNode::Or {
            or: vec![
                FilterNode::Leaf(Predicate::new("name", "ilike", pattern.clone())),
                FilterNode::Leaf(Predicate::new("description", "ilike", pattern)),
            ],
        });
    }
    for hostname in params.hostname_list() {
        query.push(Predicate::new("hostnames", "==", Value::String(hostname)));
    }

    let pagination = params.pagination();
    query.limit = Some(pagination.limit());
    query.offset = Some(pagination.offset());
    query
}

/// `GET /vulns`: one page plus the unpaginated total.
pub async fn list(
    pool: &PgPool,
    depot: &Depot,
    workspace: &Workspace,
    params: &ListParams,
) -> Result<(Vec<VulnerabilityView>, i64), AppError> {
    match filter::execute(pool, workspace, list_query(params)).await? {
        FilterOutcome::Rows {
            vulnerabilities,
            total,
        } => {
            let views = render(pool, depot, &vulnerabilities, params.with_evidence()).await?;
            Ok((views, total))
        }
        FilterOutcome::Groups { .. } => Err(AppError::Internal(
            "list query unexpectedly grouped".to_string(),
        )),
    }
}

// -- Writes --

/// `POST /vulns`.
pub async fn create(
    pool: &PgPool,
    depot: &Depot,
    workspace: &Workspace,
    creator_id: Uuid,
    payload: VulnerabilityPayload,
) -> Result<VulnerabilityView, AppError> {
    let kind = resolve_kind(payload.kind.as_deref())?;
    check_fields(kind, &payload)?;
    let parent = resolve_parent(pool, workspace.id, kind, &payload)
        .await?
        .ok_or_else(|| AppError::Validation("Missing field: parent".to_string()))?;

    let schema = custom_fields::list(pool).await?;
    let custom = custom_fields::sanitize(&schema, payload.custom_fields.clone().unwrap_or_default())?;
    let columns = assignment::insert_values(&payload, kind, custom)?;

    let from_command = match payload.command_id {
        Some(command_id) => Some(command_tool(pool, workspace.id, command_id).await?),
        None => None,
    };
    let tool = payload
        .tool
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or(from_command.filter(|t| !t.is_empty()))
        .unwrap_or_else(|| WEB_UI_TOOL.to_string());

    let attachments = attachment::decode_payloads(payload.attachments.clone().unwrap_or_default())?;
    let proxies = ProxyFields::from_payload(&payload);

    let mut params = Params::new();
    let mut names: Vec<&str> = Vec::with_capacity(columns.len() + 8);
    let mut values: Vec<String> = Vec::with_capacity(columns.len() + 8);
    let fixed = [
        ("workspace_id", "bigint", SqlValue::Int(workspace.id)),
        ("type", "vulnerability_type", SqlValue::Text(kind.db_label().to_string())),
        ("tool", "text", SqlValue::Text(tool)),
        ("creator_id", "uuid", SqlValue::Uuid(creator_id)),
        ("update_user_id", "uuid", SqlValue::Uuid(creator_id)),
        ("creator_command_id", "bigint", nullable_int(payload.command_id)),
    ];
    for (column, cast, value) in fixed {
        names.push(column);
        values.push(format!("{}::{cast}", params.push(value)));
    }
    for a in parent_assignments(parent).into_iter().chain(columns) {
        names.push(a.column);
        values.push(format!("{}::{}", params.push(a.value), a.cast));
    }
    let sql = format!(
        "INSERT INTO vulnerabilities ({}) VALUES ({}) RETURNING id",
        names.join(", "),
        values.join(", ")
    );

    let mut written = Vec::new();
    let result = async {
        let mut tx = pool.begin().await?;
        let id: i64 = bind_params!(sqlx::query_scalar(&sql), params.values())
            .fetch_one(&mut *tx)
            .await?;
        proxies.apply(&mut tx, id).await?;
        attachment::insert_all(&mut tx, depot, id, &attachments, Some(creator_id), &mut written)
            .await?;
        tx.commit().await?;
        Ok::<_, AppError>(id)
    }
    .await;

    let id = match result {
        Ok(id) => id,
        Err(e) => {
            depot.delete_all(&written).await;
            return Err(e);
        }
    };

    tracing::info!(
        vuln_id = id,
        workspace = %workspace.name,
        kind = kind.discriminator(),
        parent_type = parent.type_label(),
        parent_id = parent.id(),
        attachments = attachments.len(),
        "Vulnerability created"
    );
    get(pool, depot, workspace, id).await
}

/// `PUT /vulns/{id}` (`full`) and `PATCH /vulns/{id}`.
///
/// `type` and `tool` never change. A full update resets omitted fields and
/// replaces the attachment set with the one sent (none if omitted); a partial
/// update only touches what is present.
pub async fn update(
    pool: &PgPool,
    depot: &Depot,
    workspace: &Workspace,
    id: i64,
    user_id: Uuid,
    payload: VulnerabilityPayload,
    full: bool,
) -> Result<VulnerabilityView, AppError> {
    let existing = find(pool, workspace.id, id).await?;
    let kind = existing.kind();
    if payload.kind.as_deref().is_some_and(|k| k != kind.discriminator()) {
        tracing::debug!(vuln_id = id, "Ignoring attempt to change vulnerability type");
    }
    check_fields(kind, &payload)?;

    let custom = match payload.custom_fields.clone() {
        Some(input) => {
            let schema = custom_fields::list(pool).await?;
            Some(custom_fields::sanitize(&schema, input)?)
        }
        None => None,
    };
    let mut columns = assignment::from_payload(&payload, kind, full, custom)?;
    if let Some(parent) = resolve_parent(pool, workspace.id, kind, &payload).await? {
        columns.extend(parent_assignments(parent));
    }

    let attachments = match payload.attachments.clone() {
        Some(map) => Some(attachment::decode_payloads(map)?),
        None if full => Some(Vec::new()),
        None => None,
    };
    let mut proxies = ProxyFields::from_payload(&payload);
    if full {
        proxies.tags.get_or_insert_with(Vec::new);
        proxies.refs.get_or_insert_with(Vec::new);
        proxies.policy_violations.get_or_insert_with(Vec::new);
        proxies.cves.get_or_insert_with(Vec::new);
    }

    let mut params = Params::new();
    let mut set = vec![assignment::render_set(&columns, &mut params)];
    set.retain(|s| !s.is_empty());
    set.push(format!("update_user_id = {}", params.push(SqlValue::Uuid(user_id))));
    set.push("update_date = NOW()".to_string());
    let ws = params.push(SqlValue::Int(workspace.id));
    let vid = params.push(SqlValue::Int(id));
    let sql = format!(
        "UPDATE vulnerabilities SET {} WHERE workspace_id = {ws} AND id = {vid}",
        set.join(", ")
    );

    let mut written = Vec::new();
    let result = async {
        let mut tx = pool.begin().await?;
        bind_params!(sqlx::query(&sql), params.values())
            .execute(&mut *tx)
            .await?;
        proxies.apply(&mut tx, id).await?;
        let replaced = match &attachments {
            Some(new) => {
                attachment::replace_all(&mut tx, depot, id, new, Some(user_id), &mut written).await?
            }
            None => Vec::new(),
        };
        tx.commit().await?;
        Ok::<_, AppError>(replaced)
    }
    .await;

    match result {
        Ok(replaced) => depot.delete_all(&replaced).await,
        Err(e) => {
            depot.delete_all(&written).await;
            return Err(e);
        }
    }

    tracing::info!(vuln_id = id, workspace = %workspace.name, full, "Vulnerability updated");
    get(pool, depot, workspace, id).await
}

async fn delete_matching(
    pool: &PgPool,
    depot: &Depot,
    sql: &str,
    params: &Params,
) -> Result<Vec<i64>, AppError> {
    let mut tx = pool.begin().await?;
    let ids: Vec<i64> = bind_params!(sqlx::query_scalar(sql), params.values())
        .fetch_all(&mut *tx)
        .await?;
    let file_ids = if ids.is_empty() {
        Vec::new()
    } else {
        attachment::delete_rows_for(&mut tx, &ids).await?
    };
    tx.commit().await?;

    depot.delete_all(&file_ids).await;
    Ok(ids)
}

/// `DELETE /vulns/{id}`.
pub async fn delete(
    pool: &PgPool,
    depot: &Depot,
    workspace: &Workspace,
    id: i64,
) -> Result<(), AppError> {
    let mut params = Params::new();
    params.push(SqlValue::Int(workspace.id));
    params.push(SqlValue::Int(id));
    let deleted = delete_matching(
        pool,
        depot,
        "DELETE FROM vulnerabilities WHERE workspace_id = $1 AND id = $2 RETURNING id",
        &params,
    )
    .await?;
    if deleted.is_empty() {
        return Err(AppError::NotFound("Vulnerability not found".to_string()));
    }
    tracing::info!(vuln_id = id, workspace = %workspace.name, "Vulnerability deleted");
    Ok(())
}

/// Selection of a bulk delete.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkDeleteTarget {
    Ids(Vec<i64>),
    Severities(Vec<Severity>),
}

/// Dispatch a bulk delete body on the presence of `severities`.
pub fn parse_bulk_delete(body: &Value) -> Result<BulkDeleteTarget, AppError> {
    if let Some(severities) = body.get("severities") {
        let labels = severities.as_array().ok_or_else(|| {
            AppError::Validation("'severities' must be a list of severities".to_string())
        })?;
        let parsed = labels
            .iter()
            .map(|v| {
                v.as_str()
                    .and_then(Severity::from_label)
                    .ok_or_else(|| AppError::Validation(format!("Invalid severity: {v}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(BulkDeleteTarget::Severities(parsed));
    }

    let ids = body
        .get("ids")
        .and_then(Value::as_array)
        .and_then(|ids| ids.iter().map(Value::as_i64).collect::<Option<Vec<_>>>())
        .ok_or_else(|| AppError::Validation("'ids' must be a list of integers".to_string()))?;
    Ok(BulkDeleteTarget::Ids(ids))
}

/// `DELETE /vulns`. Only rows of the workspace are removed.
pub async fn bulk_delete(
    pool: &PgPool,
    depot: &Depot,
    workspace: &Workspace,
    target: BulkDeleteTarget,
) -> Result<i64, AppError> {
    let mut params = Params::new();
    params.push(SqlValue::Int(workspace.id));
    let condition = match &target {
        BulkDeleteTarget::Ids(ids) => {
            params.push(SqlValue::IntList(ids.clone()));
            "id = ANY($2)"
        }
        BulkDeleteTarget::Severities(severities) => {
            params.push(SqlValue::TextList(
                severities.iter().map(|s| s.db_label().to_string()).collect(),
            ));
            "severity = ANY($2::severity_level[])"
        }
    };
    let sql = format!("DELETE FROM vulnerabilities WHERE workspace_id = $1 AND {condition} RETURNING id");
    let deleted = delete_matching(pool, depot, &sql, &params).await?;

    tracing::info!(
        workspace = %workspace.name,
        deleted = deleted.len(),
        by_severity = matches!(target, BulkDeleteTarget::Severities(_)),
        "Bulk deleted vulnerabilities"
    );
    Ok(deleted.len() as i64)
}

/// `PATCH /vulns`. Column changes run as one statement, relationship lists
/// are then set row by row, all in one transaction.
pub async fn bulk_update(
    pool: &PgPool,
    workspace: &Workspace,
    user_id: Uuid,
    body: &Map<String, Value>,
) -> Result<i64, AppError> {
    let schema = custom_fields::list(pool).await?;
    let changes = assignment::parse_bulk_changes(body, &schema)?;

    let mut tx = pool.begin().await?;
    let ids: Vec<i64> = if changes.assignments.is_empty() {
        sqlx::query_scalar("SELECT id FROM vulnerabilities WHERE workspace_id = $1 AND id = ANY($2)")
            .bind(workspace.id)
            .bind(&changes.ids)
            .fetch_all(&mut *tx)
            .await?
    } else {
        let mut params = Params::new();
        let set = assignment::render_set(&changes.assignments, &mut params);
        let user = params.push(SqlValue::Uuid(user_id));
        let ws = params.push(SqlValue::Int(workspace.id));
        let ids = params.push(SqlValue::IntList(changes.ids.clone()));
        let sql = format!(
            "UPDATE vulnerabilities SET {set}, update_user_id = {user}, update_date = NOW() \
             WHERE workspace_id = {ws} AND id = ANY({ids}) RETURNING id"
        );
        bind_params!(sqlx::query_scalar(&sql), params.values())
            .fetch_all(&mut *tx)
            .await?
    };

    if !changes.proxies.is_empty() {
        for id in &ids {
            changes.proxies.apply(&mut tx, *id).await?;
        }
    }
    tx.commit().await?;

    tracing::info!(
        workspace = %workspace.name,
        requested = changes.ids.len(),
        updated = ids.len(),
        "Bulk updated vulnerabilities"
    );
    Ok(ids.len() as i64)
}

// -- Statistics --

/// Users ranked by the number of vulnerabilities they created in the workspace.
pub async fn top_users(
    pool: &PgPool,
    workspace: &Workspace,
    limit: i64,
) -> Result<Vec<TopUser>, AppError> {
    let users = sqlx::query_as::<_, TopUser>(
        "SELECT u.id, u.username, COUNT(v.id) AS count \
         FROM vulnerabilities v JOIN users u ON u.id = v.creator_id \
         WHERE v.workspace_id = $1 \
         GROUP BY u.id, u.username ORDER BY count DESC, u.username LIMIT $2",
    )
    .bind(workspace.id)
    .bind(limit.max(0))
    .fetch_all(pool)
    .await?;
    Ok(users)
}

/// Build a payload-equivalent JSON body from a serialized vulnerability.
/// Server-assigned fields are dropped.
pub fn view_to_payload(view: &VulnerabilityView) -> Result<Value, AppError> {
    let mut value = serde_json::to_value(view)
        .map_err(|e| AppError::Internal(format!("Serialization failed: {e}")))?;
    if let Some(obj) = value.as_object_mut() {
        for key in ["_id", "_rev", "date", "owned"] {
            obj.remove(key);
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::vulnerability::{
        Impact, ParentRef, VulnerabilityCommon, VulnerabilityStatus, WebDetail,
    };
    use chrono::Utc;

    fn payload(kind: &str) -> VulnerabilityPayload {
        VulnerabilityPayload {
            kind: Some(kind.to_string()),
            name: Some("XSS".to_string()),
            severity: Some(Severity::High),
            ..Default::default()
        }
    }

    #[test]
    fn web_fields_rejected_on_standard_vulnerabilities() {
        let mut plain = payload("Vulnerability");
        assert!(check_fields(VulnerabilityType::Vulnerability, &plain).is_ok());

        plain.website = Some("http://app.test".to_string());
        plain.status_code = Some(200);
        let err = check_fields(VulnerabilityType::Vulnerability, &plain).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Bad request: Web fields are not valid for Vulnerability"
        );
        assert!(check_fields(VulnerabilityType::VulnerabilityWeb, &plain).is_ok());
    }

    #[test]
    fn type_is_required_and_known() {
        let err = resolve_kind(None).unwrap_err();
        assert_eq!(err.to_string(), "Bad request: Type is required.");
        let err = resolve_kind(Some("Host")).unwrap_err();
        assert_eq!(err.to_string(), "Bad request: Invalid vulnerability type.");
        assert_eq!(
            resolve_kind(Some("VulnerabilityWeb")).unwrap(),
            VulnerabilityType::VulnerabilityWeb
        );
    }

    #[test]
    fn web_vulnerability_rejects_host_parent() {
        let mut p = payload("VulnerabilityWeb");
        p.parent = Some(ParentRef::Id(1));
        p.parent_type = Some("Host".to_string());
        let err = requested_parent(VulnerabilityType::VulnerabilityWeb, &p).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: Trying to set a host for a vulnerability web"
        );
    }

    #[test]
    fn parent_accepts_numeric_strings_and_checks_type() {
        let mut p = payload("Vulnerability");
        p.parent = Some(ParentRef::Text("12".to_string()));
        p.parent_type = Some("Service".to_string());
        assert_eq!(
            requested_parent(VulnerabilityType::Vulnerability, &p).unwrap(),
            Some(Parent::Service(12))
        );

        p.parent_type = Some("Workspace".to_string());
        let err = requested_parent(VulnerabilityType::Vulnerability, &p).unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Unknown parent type");
    }

    #[test]
    fn shorthand_parent_must_match_variant() {
        let mut p = payload("Vulnerability");
        p.service_id = Some(3);
        assert!(matches!(
            requested_parent(VulnerabilityType::Vulnerability, &p),
            Err(AppError::BadRequest(_))
        ));

        let mut p = payload("VulnerabilityWeb");
        p.host_id = Some(3);
        assert!(matches!(
            requested_parent(VulnerabilityType::VulnerabilityWeb, &p),
            Err(AppError::BadRequest(_))
        ));

        let mut p = payload("Vulnerability");
        p.host_id = Some(3);
        assert_eq!(
            requested_parent(VulnerabilityType::Vulnerability, &p).unwrap(),
            Some(Parent::Host(3))
        );
    }

    #[test]
    fn bulk_delete_dispatches_on_severities() {
        assert_eq!(
            parse_bulk_delete(&json!({"severities": ["med", "informational"]})).unwrap(),
            BulkDeleteTarget::Severities(vec![Severity::Medium, Severity::Informational])
        );
        assert_eq!(
            parse_bulk_delete(&json!({"ids": [1, 2]})).unwrap(),
            BulkDeleteTarget::Ids(vec![1, 2])
        );
        assert!(parse_bulk_delete(&json!({"severities": ["urgent"]})).is_err());
        assert!(parse_bulk_delete(&json!({})).is_err());
    }

    #[test]
    fn list_query_lowers_simple_filters() {
        let params = ListParams {
            severity: Some("high".to_string()),
            name: Some("sql".to_string()),
            search: Some("login".to_string()),
            hostnames: Some("a.com,b.com".to_string()),
            page: Some(2),
            page_size: Some(10),
            ..Default::default()
        };
        let q = list_query(&params);
        assert_eq!(q.limit, Some(10));
        assert_eq!(q.offset, Some(10));
        let leaves: Vec<_> = q.filters.iter().flat_map(|n| n.leaves()).collect();
        assert_eq!(leaves[0].name, "severity");
        assert_eq!(leaves[1].val, Some(json!("%sql%")));
        assert!(matches!(q.filters[2], FilterNode::Or { .. }));
        assert_eq!(leaves.iter().filter(|p| p.name == "hostnames").count(), 2);
    }

    fn web_vuln() -> Vulnerability {
        let now = Utc::now();
        Vulnerability {
            common: VulnerabilityCommon {
                id: 5,
                workspace_id: 1,
                name: "Reflected XSS".to_string(),
                description: "input echoed".to_string(),
                data: String::new(),
                resolution: "encode output".to_string(),
                severity: Severity::Medium,
                status: VulnerabilityStatus::Open,
                confirmed: true,
                ease_of_resolution: None,
                impact: Impact::default(),
                external_id: None,
                tool: "burp".to_string(),
                custom_fields: json!({"ticket": "SEC-1"}),
                parent: Parent::Service(9),
                creator_id: None,
                creator_username: Some("alice".to_string()),
                update_username: None,
                creator_command_id: None,
                creator_command_tool: None,
                target_host_id: Some(2),
                target_host_ip: Some("10.0.0.2".to_string()),
                target_host_os: Some("Linux".to_string()),
                create_date: now,
                update_date: now,
            },
            variant: VulnerabilityVariant::Web(WebDetail {
                method: "GET".to_string(),
                path: "/search".to_string(),
                website: "shop.example".to_string(),
                status_code: Some(200),
                ..Default::default()
            }),
        }
    }

    fn related() -> Related {
        let mut related = Related::default();
        related.names.refs.insert(5, vec!["CWE-79".to_string(), "OWASP A03".to_string()]);
        related.names.tags.insert(5, vec!["pci".to_string()]);
        related
            .hostnames
            .insert(2, vec!["shop.example".to_string()]);
        related.services.insert(
            9,
            ServiceSummary::from(&Service {
                id: 9,
                host_id: 2,
                workspace_id: 1,
                name: "https".to_string(),
                port: 443,
                protocol: "tcp".to_string(),
                status: "open".to_string(),
                version: String::new(),
            }),
        );
        related
    }

    #[test]
    fn view_carries_related_collections_and_web_fields() {
        let view = to_view(&web_vuln(), &related());
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["_id"], 5);
        assert_eq!(json["type"], "VulnerabilityWeb");
        assert_eq!(json["severity"], "med");
        assert_eq!(json["parent_type"], "Service");
        assert_eq!(json["hostnames"], json!(["shop.example"]));
        assert_eq!(json["service"]["summary"], "(443/tcp) https");
        assert_eq!(json["cwe"], json!(["CWE-79"]));
        assert_eq!(json["owasp"], json!(["OWASP A03"]));
        assert_eq!(json["method"], "GET");
        assert_eq!(json["status_code"], 200);
        assert_eq!(json["metadata"]["creator"], "burp");
        assert_eq!(json["_attachments"], json!({}));
    }

    #[test]
    fn serialized_view_is_a_valid_create_payload() {
        let view = to_view(&web_vuln(), &related());
        let body = view_to_payload(&view).unwrap();
        assert!(body.get("_id").is_none());
        let payload: VulnerabilityPayload = serde_json::from_value(body).unwrap();

        assert_eq!(resolve_kind(payload.kind.as_deref()).unwrap(), VulnerabilityType::VulnerabilityWeb);
        assert_eq!(
            requested_parent(VulnerabilityType::VulnerabilityWeb, &payload).unwrap(),
            Some(Parent::Service(9))
        );
        assert_eq!(payload.name.as_deref(), Some("Reflected XSS"));
        assert_eq!(payload.desc.as_deref(), Some("input echoed"));
        assert_eq!(payload.severity, Some(Severity::Medium));
        assert_eq!(payload.confirmed, Some(true));
        assert_eq!(payload.path.as_deref(), Some("/search"));
        assert_eq!(payload.tags, Some(vec!["pci".to_string()]));
        assert_eq!(payload.custom_fields.unwrap()["ticket"], "SEC-1");
    }
}

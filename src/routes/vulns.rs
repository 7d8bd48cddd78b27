//! Vulnerability routes under `/api/v1/ws/{workspace}/vulns`: CRUD, filter,
//! CSV export, statistics and bulk operations.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::AppError;
use crate::filters::{FilterQuery, Predicate};
use crate::middleware::auth::CurrentUser;
use crate::middleware::rbac::RequireWriter;
use crate::models::pagination::VulnerabilityList;
use crate::models::user::TopUser;
use crate::models::vulnerability::{ListParams, VulnerabilityPayload, VulnerabilityView};
use crate::models::workspace::Workspace;
use crate::routes::attachment_disposition;
use crate::services::filter::{self, FilterOutcome};
use crate::services::vulnerability as vuln_service;
use crate::services::{custom_fields, export, workspace as workspace_service};
use crate::AppState;

const EMPTY_FILTER: &str = r#"{"filters": []}"#;

#[derive(Debug, Deserialize)]
pub struct FilterParams {
    pub q: Option<String>,
    pub export_csv: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub confirmed: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CountParams {
    pub group_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopUsersParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct GroupCount {
    pub groups: Vec<Map<String, Value>>,
    pub total_count: i64,
}

#[derive(Debug, Serialize)]
pub struct TopUsers {
    pub users: Vec<TopUser>,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub deleted: i64,
}

#[derive(Debug, Serialize)]
pub struct Updated {
    pub updated: i64,
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(str::to_ascii_lowercase).as_deref(),
        Some("true" | "1" | "yes")
    )
}

fn keyed(views: Vec<VulnerabilityView>, count: i64) -> VulnerabilityList<VulnerabilityView> {
    VulnerabilityList::keyed(views.into_iter().map(|v| (v.id, v)).collect(), count)
}

/// Render filter rows as a CSV download.
async fn csv_download(
    state: &AppState,
    workspace: &Workspace,
    outcome: FilterOutcome,
) -> Result<Response, AppError> {
    let vulnerabilities = match outcome {
        FilterOutcome::Rows {
            vulnerabilities, ..
        } => vulnerabilities,
        FilterOutcome::Groups { .. } => {
            return Err(AppError::BadRequest(
                "Grouped results cannot be exported".to_string(),
            ));
        }
    };

    let views = vuln_service::render(&state.db, &state.depot, &vulnerabilities, false).await?;
    let schema = custom_fields::list(&state.db).await?;
    let body = export::export_csv(&views, &schema)?;

    tracing::info!(
        workspace = %workspace.name,
        rows = views.len(),
        "Exported vulnerabilities as CSV"
    );

    let disposition = attachment_disposition(&export::filename(&workspace.name));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

// -- Reads --

/// GET /api/v1/ws/{workspace}/vulns — paginated list with simple filters.
pub async fn list(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(workspace): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<VulnerabilityList<VulnerabilityView>>, AppError> {
    let workspace = workspace_service::resolve(&state.db, &workspace).await?;
    let (views, total) = vuln_service::list(&state.db, &state.depot, &workspace, &params).await?;
    Ok(Json(keyed(views, total)))
}

/// GET /api/v1/ws/{workspace}/vulns/{id} — one vulnerability with evidence.
pub async fn get_by_id(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path((workspace, id)): Path<(String, i64)>,
) -> Result<Json<VulnerabilityView>, AppError> {
    let workspace = workspace_service::resolve(&state.db, &workspace).await?;
    let view = vuln_service::get(&state.db, &state.depot, &workspace, id).await?;
    Ok(Json(view))
}

/// GET /api/v1/ws/{workspace}/vulns/filter?q=<json> — filter-tree query,
/// optionally grouped or exported as CSV.
pub async fn filter(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(workspace): Path<String>,
    Query(params): Query<FilterParams>,
) -> Result<Response, AppError> {
    let workspace = workspace_service::resolve(&state.db, &workspace).await?;
    let raw = params.q.as_deref().unwrap_or(EMPTY_FILTER);
    let outcome = filter::run_filter(&state.db, &workspace, raw).await?;

    if is_truthy(params.export_csv.as_deref()) {
        return csv_download(&state, &workspace, outcome).await;
    }

    let response = match outcome {
        FilterOutcome::Rows {
            vulnerabilities,
            total,
        } => {
            let views =
                vuln_service::render(&state.db, &state.depot, &vulnerabilities, false).await?;
            Json(keyed(views, total)).into_response()
        }
        FilterOutcome::Groups { groups, count } => {
            Json(VulnerabilityList::indexed(groups, count)).into_response()
        }
    };
    Ok(response)
}

/// GET /api/v1/ws/{workspace}/vulns/export_csv?confirmed=&q= — CSV export.
pub async fn export_csv(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(workspace): Path<String>,
    Query(params): Query<ExportParams>,
) -> Result<Response, AppError> {
    let workspace = workspace_service::resolve(&state.db, &workspace).await?;
    let mut query = FilterQuery::parse(params.q.as_deref().unwrap_or(EMPTY_FILTER))?;
    if params.confirmed.as_deref().is_some_and(|c| !c.is_empty()) {
        query.push(Predicate::new("confirmed", "==", Value::Bool(true)));
    }
    let outcome = filter::execute(&state.db, &workspace, query).await?;
    csv_download(&state, &workspace, outcome).await
}

/// GET /api/v1/ws/{workspace}/vulns/count?group_by=<field> — counts per value.
pub async fn count(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(workspace): Path<String>,
    Query(params): Query<CountParams>,
) -> Result<Json<GroupCount>, AppError> {
    let group_by = params
        .group_by
        .filter(|g| !g.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing group_by parameter".to_string()))?;
    let workspace = workspace_service::resolve(&state.db, &workspace).await?;
    let (groups, total_count) = filter::count_by(&state.db, &workspace, &group_by).await?;
    Ok(Json(GroupCount {
        groups,
        total_count,
    }))
}

/// GET /api/v1/ws/{workspace}/vulns/top_users?limit=n — most active creators.
pub async fn top_users(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(workspace): Path<String>,
    Query(params): Query<TopUsersParams>,
) -> Result<Json<TopUsers>, AppError> {
    let workspace = workspace_service::resolve(&state.db, &workspace).await?;
    let users =
        vuln_service::top_users(&state.db, &workspace, params.limit.unwrap_or(1)).await?;
    Ok(Json(TopUsers { users }))
}

// -- Writes --

/// POST /api/v1/ws/{workspace}/vulns — create a vulnerability (pentester+).
pub async fn create(
    State(state): State<AppState>,
    RequireWriter(user): RequireWriter,
    Path(workspace): Path<String>,
    Json(body): Json<VulnerabilityPayload>,
) -> Result<(StatusCode, Json<VulnerabilityView>), AppError> {
    let workspace = workspace_service::resolve_writable(&state.db, &workspace).await?;
    let view = vuln_service::create(&state.db, &state.depot, &workspace, user.id, body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// PUT /api/v1/ws/{workspace}/vulns/{id} — full update (pentester+).
pub async fn replace(
    State(state): State<AppState>,
    RequireWriter(user): RequireWriter,
    Path((workspace, id)): Path<(String, i64)>,
    Json(body): Json<VulnerabilityPayload>,
) -> Result<Json<VulnerabilityView>, AppError> {
    let workspace = workspace_service::resolve_writable(&state.db, &workspace).await?;
    let view =
        vuln_service::update(&state.db, &state.depot, &workspace, id, user.id, body, true).await?;
    Ok(Json(view))
}

/// PATCH /api/v1/ws/{workspace}/vulns/{id} — partial update (pentester+).
pub async fn patch(
    State(state): State<AppState>,
    RequireWriter(user): RequireWriter,
    Path((workspace, id)): Path<(String, i64)>,
    Json(body): Json<VulnerabilityPayload>,
) -> Result<Json<VulnerabilityView>, AppError> {
    let workspace = workspace_service::resolve_writable(&state.db, &workspace).await?;
    let view =
        vuln_service::update(&state.db, &state.depot, &workspace, id, user.id, body, false)
            .await?;
    Ok(Json(view))
}

/// DELETE /api/v1/ws/{workspace}/vulns/{id} (pentester+).
pub async fn delete(
    State(state): State<AppState>,
    RequireWriter(_user): RequireWriter,
    Path((workspace, id)): Path<(String, i64)>,
) -> Result<StatusCode, AppError> {
    let workspace = workspace_service::resolve_writable(&state.db, &workspace).await?;
    vuln_service::delete(&state.db, &state.depot, &workspace, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/ws/{workspace}/vulns — bulk delete by ids or severities.
pub async fn bulk_delete(
    State(state): State<AppState>,
    RequireWriter(_user): RequireWriter,
    Path(workspace): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Deleted>, AppError> {
    let target = vuln_service::parse_bulk_delete(&body)?;
    let workspace = workspace_service::resolve_writable(&state.db, &workspace).await?;
    let deleted = vuln_service::bulk_delete(&state.db, &state.depot, &workspace, target).await?;
    Ok(Json(Deleted { deleted }))
}

/// PATCH /api/v1/ws/{workspace}/vulns — bulk update of the listed ids.
pub async fn bulk_update(
    State(state): State<AppState>,
    RequireWriter(user): RequireWriter,
    Path(workspace): Path<String>,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<Updated>, AppError> {
    let workspace = workspace_service::resolve_writable(&state.db, &workspace).await?;
    let updated = vuln_service::bulk_update(&state.db, &workspace, user.id, &body).await?;
    Ok(Json(Updated { updated }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_flag_parsing() {
        assert!(is_truthy(Some("true")));
        assert!(is_truthy(Some("True")));
        assert!(is_truthy(Some("1")));
        assert!(!is_truthy(Some("false")));
        assert!(!is_truthy(Some("")));
        assert!(!is_truthy(None));
    }

    #[test]
    fn empty_filter_is_a_valid_document() {
        let query = FilterQuery::parse(EMPTY_FILTER).unwrap();
        assert!(query.filters.is_empty());
        assert!(!query.is_grouped());
    }

    #[test]
    fn group_count_shape() {
        let mut group = Map::new();
        group.insert("severity".to_string(), Value::String("high".to_string()));
        group.insert("count".to_string(), Value::from(3));
        let body = serde_json::to_value(GroupCount {
            groups: vec![group],
            total_count: 3,
        })
        .unwrap();
        assert_eq!(body["total_count"], 3);
        assert_eq!(body["groups"][0]["severity"], "high");
    }
}

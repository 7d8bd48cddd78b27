//! Filter orchestration: filter tree in, vulnerability rows or groups out.

use serde_json::{Map, Number, Value};
use sqlx::{PgPool, Row};

use crate::bind_params;
use crate::errors::AppError;
use crate::filters::fields::{Column, FieldKind};
use crate::filters::translate::{self, Params};
use crate::filters::value::SqlValue;
use crate::filters::{split_hostname_filters, FilterError, FilterNode, FilterQuery, Predicate};
use crate::models::vulnerability::{
    Vulnerability, VulnerabilityRow, VULNERABILITY_COLUMNS, VULNERABILITY_JOINS,
};
use crate::models::workspace::Workspace;

/// Applied after any client ordering.
const DEFAULT_ORDER: [&str; 4] = [
    "v.confirmed DESC",
    "v.severity DESC",
    "v.create_date ASC",
    "v.id ASC",
];

/// A workspace-scoped `FROM ... WHERE ...` body with its bind parameters.
#[derive(Debug, Clone)]
pub struct FilterSql {
    body: String,
    order: Vec<String>,
    params: Params,
}

impl FilterSql {
    pub fn params(&self) -> &[SqlValue] {
        self.params.values()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn select_sql(&self, limit: Option<i64>, offset: Option<i64>) -> String {
        let mut sql = format!(
            "SELECT {VULNERABILITY_COLUMNS} {} ORDER BY {}",
            self.body,
            self.order.join(", ")
        );
        push_window(&mut sql, limit, offset);
        sql
    }

    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) {}", self.body)
    }

    /// Group by `columns`, selecting each as text (`g0`, `g1`, ...) plus `count`.
    pub fn group_sql(
        &self,
        columns: &[(String, Column)],
        order: &[String],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> String {
        let selected = columns
            .iter()
            .enumerate()
            .map(|(i, (_, c))| format!("{}::text AS g{i}", c.expr))
            .collect::<Vec<_>>()
            .join(", ");
        let grouped = columns
            .iter()
            .map(|(_, c)| c.expr)
            .collect::<Vec<_>>()
            .join(", ");
        let order = if order.is_empty() {
            grouped.clone()
        } else {
            order.join(", ")
        };
        let mut sql = format!(
            "SELECT {selected}, COUNT(*) AS count {} GROUP BY {grouped} ORDER BY {order}",
            self.body
        );
        push_window(&mut sql, limit, offset);
        sql
    }
}

fn push_window(sql: &mut String, limit: Option<i64>, offset: Option<i64>) {
    if let Some(limit) = limit.filter(|l| *l > 0) {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = offset.filter(|o| *o > 0) {
        sql.push_str(&format!(" OFFSET {offset}"));
    }
}

fn hostname_values(predicates: &[Predicate]) -> Result<Vec<String>, FilterError> {
    let mut names = Vec::new();
    for p in predicates {
        match &p.val {
            Some(Value::String(s)) => names.push(s.clone()),
            Some(Value::Array(items)) => {
                for item in items {
                    let s = item.as_str().ok_or_else(|| FilterError::InvalidValue {
                        field: p.name.clone(),
                        reason: "expected hostnames as strings".to_string(),
                    })?;
                    names.push(s.to_string());
                }
            }
            _ => {
                return Err(FilterError::InvalidValue {
                    field: p.name.clone(),
                    reason: "expected a hostname".to_string(),
                })
            }
        }
    }
    Ok(names)
}

/// Build the scoped query for an already split filter tree.
///
/// The workspace predicate always comes first. Hostname predicates become a
/// membership test against the union of the host and service paths, so a
/// vulnerability matching through both is returned once.
pub fn build_filter_query(
    filters: &[FilterNode],
    hostnames: &[Predicate],
    query: &FilterQuery,
    workspace_id: i64,
) -> Result<FilterSql, FilterError> {
    let mut params = Params::new();
    let ws = params.push(SqlValue::Int(workspace_id));
    let mut conditions = vec![format!("v.workspace_id = {ws}")];

    if let Some(tree) = translate::translate_tree(filters, &mut params)? {
        conditions.push(tree);
    }

    if !hostnames.is_empty() {
        let names = params.push(SqlValue::TextList(hostname_values(hostnames)?));
        conditions.push(format!(
            "v.id IN (SELECT sv.id FROM vulnerabilities sv \
             JOIN services hs ON hs.id = sv.service_id \
             JOIN hostnames hn ON hn.host_id = hs.host_id WHERE hn.name = ANY({names}) \
             UNION SELECT hv.id FROM vulnerabilities hv \
             JOIN hostnames hn ON hn.host_id = hv.host_id WHERE hn.name = ANY({names}))"
        ));
    }

    let mut order = translate::order_terms(&query.order_by)?;
    order.extend(DEFAULT_ORDER.iter().map(|t| t.to_string()));

    Ok(FilterSql {
        body: format!(
            "FROM vulnerabilities v {VULNERABILITY_JOINS} WHERE {}",
            conditions.join(" AND ")
        ),
        order,
        params,
    })
}

/// Result of a filter request.
#[derive(Debug)]
pub enum FilterOutcome {
    Rows {
        vulnerabilities: Vec<Vulnerability>,
        total: i64,
    },
    Groups {
        groups: Vec<Map<String, Value>>,
        count: i64,
    },
}

/// Parse the raw `q` document and run it.
pub async fn run_filter(
    pool: &PgPool,
    workspace: &Workspace,
    raw: &str,
) -> Result<FilterOutcome, AppError> {
    let query = FilterQuery::parse(raw).map_err(|e| {
        tracing::debug!(error = %e, "Rejected filter document");
        e
    })?;
    execute(pool, workspace, query).await
}

/// Run a parsed filter document against one workspace.
pub async fn execute(
    pool: &PgPool,
    workspace: &Workspace,
    mut query: FilterQuery,
) -> Result<FilterOutcome, AppError> {
    let (filters, hostnames) = split_hostname_filters(std::mem::take(&mut query.filters));
    let (limit, offset) = query.take_pagination();

    if query.is_grouped() {
        let columns = translate::group_columns(&query.group_by)?;
        let order = group_order(&query, &columns)?;
        let sql = build_filter_query(&filters, &hostnames, &query, workspace.id)?;
        let groups = fetch_groups(pool, &sql, &columns, &order, limit, offset).await?;
        let count = groups.len() as i64;
        return Ok(FilterOutcome::Groups { groups, count });
    }

    let sql = build_filter_query(&filters, &hostnames, &query, workspace.id)?;
    let count_sql = sql.count_sql();
    let total: i64 = bind_params!(sqlx::query_scalar(&count_sql), sql.params())
        .fetch_one(pool)
        .await?;
    let select_sql = sql.select_sql(limit, offset);
    let rows = bind_params!(sqlx::query_as::<_, VulnerabilityRow>(&select_sql), sql.params())
        .fetch_all(pool)
        .await?;

    tracing::debug!(
        workspace = %workspace.name,
        total,
        returned = rows.len(),
        hostname_filters = hostnames.len(),
        "Filtered vulnerabilities"
    );

    Ok(FilterOutcome::Rows {
        vulnerabilities: into_domain(rows)?,
        total,
    })
}

pub fn into_domain(rows: Vec<VulnerabilityRow>) -> Result<Vec<Vulnerability>, AppError> {
    rows.into_iter()
        .map(|row| Vulnerability::try_from(row).map_err(|e| AppError::Internal(e.to_string())))
        .collect()
}

/// Ordering of grouped rows; only grouped fields can be ordered on.
fn group_order(query: &FilterQuery, columns: &[(String, Column)]) -> Result<Vec<String>, FilterError> {
    for o in &query.order_by {
        if !columns.iter().any(|(name, _)| *name == o.field) {
            return Err(FilterError::Schema(format!(
                "cannot order grouped rows by '{}'",
                o.field
            )));
        }
    }
    translate::order_terms(&query.order_by)
}

/// Run a grouped query and shape each row as `{<field>: value, ..., count}`.
pub async fn fetch_groups(
    pool: &PgPool,
    sql: &FilterSql,
    columns: &[(String, Column)],
    order: &[String],
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<Vec<Map<String, Value>>, AppError> {
    let group_sql = sql.group_sql(columns, order, limit, offset);
    let rows = bind_params!(sqlx::query(&group_sql), sql.params())
        .fetch_all(pool)
        .await?;

    let grouped: Vec<&str> = columns.iter().map(|(name, _)| name.as_str()).collect();
    let mut groups = Vec::with_capacity(rows.len());
    for row in rows {
        let mut group = Map::new();
        for (i, (name, column)) in columns.iter().enumerate() {
            let raw: Option<String> = row.try_get(i)?;
            group.insert(name.clone(), group_value(column.kind, raw));
        }
        let count: i64 = row.try_get("count")?;
        group.insert("count".to_string(), Value::from(count));
        normalize_severity_group(&mut group, &grouped);
        groups.push(group);
    }
    Ok(groups)
}

fn group_value(kind: FieldKind, raw: Option<String>) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };
    match kind {
        FieldKind::Integer => raw
            .parse::<i64>()
            .map(|n| Value::Number(Number::from(n)))
            .unwrap_or(Value::String(raw)),
        FieldKind::Boolean => Value::Bool(raw == "true" || raw == "t"),
        _ => Value::String(raw),
    }
}

/// API label of a stored severity; other values pass through.
pub fn severity_label(value: &str) -> &str {
    match value {
        "informational" => "info",
        "medium" => "med",
        other => other,
    }
}

/// Rewrite the severity of a group to its API label. When severity is the
/// only grouped field the label is mirrored into `name`.
pub fn normalize_severity_group(group: &mut Map<String, Value>, grouped: &[&str]) {
    let Some(severity) = group.get("severity").cloned() else {
        return;
    };
    let label = match &severity {
        Value::String(s) => Value::String(severity_label(s).to_string()),
        other => other.clone(),
    };
    group.insert("severity".to_string(), label.clone());
    if matches!(grouped, ["severity"]) {
        group.insert("name".to_string(), label);
    }
}

/// `GET /vulns/count?group_by=<field>` over the whole workspace.
pub async fn count_by(
    pool: &PgPool,
    workspace: &Workspace,
    group_by: &str,
) -> Result<(Vec<Map<String, Value>>, i64), AppError> {
    let query = FilterQuery {
        group_by: vec![group_by.to_string()],
        ..FilterQuery::default()
    };
    let columns = translate::group_columns(&query.group_by)?;
    let sql = build_filter_query(&[], &[], &query, workspace.id)?;
    let groups = fetch_groups(pool, &sql, &columns, &[], None, None).await?;
    let total = groups
        .iter()
        .filter_map(|g| g.get("count").and_then(Value::as_i64))
        .sum();
    Ok((groups, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn built(doc: Value) -> FilterSql {
        let mut query = FilterQuery::from_value(&doc).unwrap();
        let (filters, hostnames) = split_hostname_filters(std::mem::take(&mut query.filters));
        build_filter_query(&filters, &hostnames, &query, 7).unwrap()
    }

    #[test]
    fn workspace_scope_is_always_first() {
        let sql = built(json!({"filters": []}));
        assert!(sql.body().ends_with("WHERE v.workspace_id = $1"));
        assert_eq!(sql.params(), &[SqlValue::Int(7)]);

        let sql = built(json!({"filters": [{"name": "severity", "op": "==", "val": "high"}]}));
        assert!(sql
            .body()
            .ends_with("WHERE v.workspace_id = $1 AND v.severity = $2::severity_level"));
    }

    #[test]
    fn hostnames_become_a_union_membership_test() {
        let sql = built(json!({"filters": [
            {"name": "hostnames", "op": "eq", "val": "a.com"},
            {"or": [{"name": "hostnames", "op": "eq", "val": "b.com"}]}
        ]}));
        assert!(sql.body().contains("v.id IN (SELECT sv.id"));
        assert!(sql.body().contains(" UNION SELECT hv.id "));
        assert_eq!(
            sql.params()[1],
            SqlValue::TextList(vec!["a.com".to_string(), "b.com".to_string()])
        );
        assert_eq!(sql.params().len(), 2);
    }

    #[test]
    fn client_order_precedes_default_order() {
        let sql = built(json!({"order_by": [{"field": "name", "direction": "asc"}]}));
        let select = sql.select_sql(Some(10), Some(20));
        assert!(select.contains(
            "ORDER BY v.name ASC, v.confirmed DESC, v.severity DESC, v.create_date ASC, v.id ASC"
        ));
        assert!(select.ends_with("LIMIT 10 OFFSET 20"));
    }

    #[test]
    fn unknown_fields_are_filter_errors() {
        let query = FilterQuery::from_value(&json!({"order_by": [{"field": "nope"}]})).unwrap();
        let err = build_filter_query(&[], &[], &query, 1).unwrap_err();
        assert_eq!(AppError::from(err).to_string(), "Invalid filters: unknown field 'nope'");
    }

    #[test]
    fn grouped_sql_selects_text_and_count() {
        let query = FilterQuery::from_value(&json!({"group_by": [{"field": "severity"}]})).unwrap();
        let columns = translate::group_columns(&query.group_by).unwrap();
        let sql = build_filter_query(&[], &[], &query, 1).unwrap();
        let group = sql.group_sql(&columns, &[], None, None);
        assert!(group.starts_with("SELECT v.severity::text AS g0, COUNT(*) AS count FROM"));
        assert!(group.ends_with("GROUP BY v.severity ORDER BY v.severity"));
    }

    #[test]
    fn grouped_order_must_use_grouped_fields() {
        let query = FilterQuery::from_value(&json!({
            "group_by": "severity",
            "order_by": [{"field": "name"}]
        }))
        .unwrap();
        let columns = translate::group_columns(&query.group_by).unwrap();
        assert!(group_order(&query, &columns).is_err());
    }

    #[test]
    fn severity_groups_are_normalized_in_both_fields() {
        for (stored, expected) in [("informational", "info"), ("medium", "med"), ("high", "high")] {
            let mut group = Map::new();
            group.insert("severity".to_string(), json!(stored));
            group.insert("count".to_string(), json!(3));
            normalize_severity_group(&mut group, &["severity"]);
            assert_eq!(group["severity"], json!(expected));
            assert_eq!(group["name"], json!(expected));
            assert_eq!(group["count"], json!(3));
        }
    }

    #[test]
    fn non_severity_groups_are_untouched() {
        let mut group = Map::new();
        group.insert("status".to_string(), json!("open"));
        normalize_severity_group(&mut group, &["status"]);
        assert!(!group.contains_key("name"));
    }

    #[test]
    fn multi_field_severity_groups_keep_their_name() {
        let mut group = Map::new();
        group.insert("severity".to_string(), json!("medium"));
        group.insert("name".to_string(), json!("SQL Injection"));
        group.insert("count".to_string(), json!(4));
        normalize_severity_group(&mut group, &["severity", "name"]);
        assert_eq!(group["severity"], json!("med"));
        assert_eq!(group["name"], json!("SQL Injection"));
        assert_eq!(group["count"], json!(4));

        let mut group = Map::new();
        group.insert("severity".to_string(), json!("informational"));
        group.insert("status".to_string(), json!("open"));
        normalize_severity_group(&mut group, &["severity", "status"]);
        assert_eq!(group["severity"], json!("info"));
        assert!(!group.contains_key("name"));
    }

    #[test]
    fn group_values_keep_their_type() {
        assert_eq!(group_value(FieldKind::Integer, Some("443".to_string())), json!(443));
        assert_eq!(group_value(FieldKind::Boolean, Some("true".to_string())), json!(true));
        assert_eq!(group_value(FieldKind::Text, None), Value::Null);
    }
}

//! Translation of a filter tree into a parameterized SQL condition.

use serde_json::Value;

use super::fields::{self, Column, Field, FieldKind, Relation};
use super::value::{self, SqlValue};
use super::{Direction, FilterError, FilterNode, Operator, OrderBy, Predicate};

/// Positional bind parameters collected while rendering SQL.
#[derive(Debug, Default, Clone)]
pub struct Params {
    values: Vec<SqlValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value and return its placeholder (`$n`).
    pub fn push(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

/// Translate a top-level node list (implicit AND). `None` means no constraint.
pub fn translate_tree(
    nodes: &[FilterNode],
    params: &mut Params,
) -> Result<Option<String>, FilterError> {
    join(nodes, " AND ", params)
}

fn join(
    nodes: &[FilterNode],
    separator: &str,
    params: &mut Params,
) -> Result<Option<String>, FilterError> {
    let mut parts = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let Some(sql) = translate_node(node, params)? {
            parts.push(sql);
        }
    }
    Ok(match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(format!("({})", parts.join(separator))),
    })
}

fn translate_node(node: &FilterNode, params: &mut Params) -> Result<Option<String>, FilterError> {
    match node {
        FilterNode::Leaf(predicate) => translate_predicate(predicate, params).map(Some),
        FilterNode::And { and } => join(and, " AND ", params),
        FilterNode::Or { or } => join(or, " OR ", params),
    }
}

/// Render one leaf predicate.
pub fn translate_predicate(p: &Predicate, params: &mut Params) -> Result<String, FilterError> {
    let op = p.operator()?;
    match fields::resolve(&p.name).ok_or_else(|| FilterError::UnknownField(p.name.clone()))? {
        Field::Column(column) => column_predicate(p, op, column, params),
        Field::Relation(relation) => relation_predicate(p, op, relation, params),
    }
}

fn unsupported(p: &Predicate) -> FilterError {
    FilterError::UnsupportedOperator {
        field: p.name.clone(),
        op: p.op.clone(),
    }
}

fn placeholder(column: &Column, ph: String, list: bool) -> String {
    match (column.kind.pg_enum(), list) {
        (Some(ty), false) => format!("{ph}::{ty}"),
        (Some(ty), true) => format!("{ph}::{ty}[]"),
        (None, _) => ph,
    }
}

fn column_predicate(
    p: &Predicate,
    op: Operator,
    column: Column,
    params: &mut Params,
) -> Result<String, FilterError> {
    let expr = column.expr;

    if let Some(other) = &p.field {
        let other = fields::resolve_column(other)
            .ok_or_else(|| FilterError::UnknownField(other.clone()))?;
        let cmp = op.comparison().ok_or_else(|| unsupported(p))?;
        return Ok(if column.kind == other.kind {
            format!("{expr} {cmp} {}", other.expr)
        } else {
            format!("{expr}::text {cmp} {}::text", other.expr)
        });
    }

    match op {
        Operator::IsNull => Ok(format!("{expr} IS NULL")),
        Operator::IsNotNull => Ok(format!("{expr} IS NOT NULL")),
        Operator::Eq | Operator::Ne | Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le => {
            let cmp = op.comparison().ok_or_else(|| unsupported(p))?;
            match p.val.as_ref() {
                None | Some(Value::Null) => match op {
                    Operator::Eq => Ok(format!("{expr} IS NULL")),
                    Operator::Ne => Ok(format!("{expr} IS NOT NULL")),
                    _ => Err(FilterError::InvalidValue {
                        field: p.name.clone(),
                        reason: "null can only be compared for equality".to_string(),
                    }),
                },
                Some(val) => {
                    let ph = params.push(value::coerce(&p.name, column.kind, val)?);
                    Ok(format!("{expr} {cmp} {}", placeholder(&column, ph, false)))
                }
            }
        }
        Operator::In | Operator::NotIn => {
            let val = p.val.as_ref().ok_or_else(|| FilterError::InvalidValue {
                field: p.name.clone(),
                reason: "expected a list".to_string(),
            })?;
            let ph = params.push(value::coerce_list(&p.name, column.kind, val)?);
            let ph = placeholder(&column, ph, true);
            Ok(if op == Operator::In {
                format!("{expr} = ANY({ph})")
            } else {
                format!("{expr} <> ALL({ph})")
            })
        }
        Operator::Like | Operator::ILike | Operator::NotLike => {
            if !column.kind.is_textual() {
                return Err(unsupported(p));
            }
            let val = p.val.as_ref().ok_or_else(|| unsupported(p))?;
            let ph = params.push(value::pattern(&p.name, val)?);
            let lhs = if column.kind == FieldKind::Text {
                expr.to_string()
            } else {
                format!("{expr}::text")
            };
            let keyword = match op {
                Operator::Like => "LIKE",
                Operator::ILike => "ILIKE",
                _ => "NOT LIKE",
            };
            Ok(format!("{lhs} {keyword} {ph}"))
        }
        Operator::Has | Operator::Any => Err(unsupported(p)),
    }
}

fn relation_predicate(
    p: &Predicate,
    op: Operator,
    relation: Relation,
    params: &mut Params,
) -> Result<String, FilterError> {
    if p.field.is_some() {
        return Err(unsupported(p));
    }
    let source = relation.source();
    let exists = |cond: Option<String>, negate: bool| {
        let not = if negate { "NOT " } else { "" };
        match cond {
            Some(cond) => format!("{not}EXISTS (SELECT 1 FROM {source} AND {cond})"),
            None => format!("{not}EXISTS (SELECT 1 FROM {source})"),
        }
    };

    match op {
        Operator::IsNull => Ok(exists(None, true)),
        Operator::IsNotNull => Ok(exists(None, false)),
        Operator::Has | Operator::Any => {
            let val = p.val.as_ref().ok_or_else(|| unsupported(p))?;
            let cond = match val {
                Value::Object(obj) => {
                    let nested = Predicate::from_object(obj)?;
                    if nested.name != "name" {
                        return Err(FilterError::UnknownField(format!(
                            "{}.{}",
                            p.name, nested.name
                        )));
                    }
                    let nested_op = nested.operator()?;
                    name_condition(&nested, nested_op, params)?
                }
                Value::Array(_) => name_condition(p, Operator::In, params)?,
                _ => name_condition(p, Operator::Eq, params)?,
            };
            Ok(exists(Some(cond), false))
        }
        Operator::Eq | Operator::In | Operator::Like | Operator::ILike => {
            Ok(exists(Some(name_condition(p, op, params)?), false))
        }
        Operator::Ne => Ok(exists(Some(name_condition(p, Operator::Eq, params)?), true)),
        Operator::NotIn => Ok(exists(Some(name_condition(p, Operator::In, params)?), true)),
        Operator::NotLike => Ok(exists(Some(name_condition(p, Operator::Like, params)?), true)),
        Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le => Err(unsupported(p)),
    }
}

/// Condition on the related row's `r.name`.
fn name_condition(p: &Predicate, op: Operator, params: &mut Params) -> Result<String, FilterError> {
    let val = p.val.as_ref().ok_or_else(|| unsupported(p))?;
    let text = |params: &mut Params| value::coerce(&p.name, FieldKind::Text, val).map(|v| params.push(v));

    match op {
        Operator::Eq => Ok(format!("r.name = {}", text(params)?)),
        Operator::Ne => Ok(format!("r.name <> {}", text(params)?)),
        Operator::Like => Ok(format!("r.name LIKE {}", text(params)?)),
        Operator::ILike => Ok(format!("r.name ILIKE {}", text(params)?)),
        Operator::NotLike => Ok(format!("r.name NOT LIKE {}", text(params)?)),
        Operator::In | Operator::NotIn => {
            let ph = params.push(value::coerce_list(&p.name, FieldKind::Text, val)?);
            Ok(if op == Operator::In {
                format!("r.name = ANY({ph})")
            } else {
                format!("r.name <> ALL({ph})")
            })
        }
        _ => Err(unsupported(p)),
    }
}

/// Render client `order_by` entries as SQL ordering terms.
pub fn order_terms(order_by: &[OrderBy]) -> Result<Vec<String>, FilterError> {
    order_by
        .iter()
        .map(|o| {
            let column = fields::resolve_column(&o.field)
                .ok_or_else(|| FilterError::UnknownField(o.field.clone()))?;
            let dir = match o.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            Ok(format!("{} {dir}", column.expr))
        })
        .collect()
}

/// Resolve `group_by` field names into `(name, column)` pairs.
pub fn group_columns(group_by: &[String]) -> Result<Vec<(String, Column)>, FilterError> {
    group_by
        .iter()
        .map(|name| {
            fields::resolve_column(name)
                .map(|c| (name.clone(), c))
                .ok_or_else(|| FilterError::UnknownField(name.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterQuery;
    use serde_json::json;

    fn render(doc: serde_json::Value) -> Result<(Option<String>, Params), FilterError> {
        let q = FilterQuery::from_value(&doc)?;
        let mut params = Params::new();
        let sql = translate_tree(&q.filters, &mut params)?;
        Ok((sql, params))
    }

    #[test]
    fn empty_tree_has_no_condition() {
        let (sql, params) = render(json!({"filters": []})).unwrap();
        assert!(sql.is_none());
        assert!(params.is_empty());
    }

    #[test]
    fn enum_comparison_casts_placeholder() {
        let (sql, params) =
            render(json!({"filters":[{"name":"severity","op":"==","val":"med"}]})).unwrap();
        assert_eq!(sql.unwrap(), "v.severity = $1::severity_level");
        assert_eq!(params.values(), &[SqlValue::Text("medium".to_string())]);
    }

    #[test]
    fn nested_groups_render_with_parentheses() {
        let (sql, params) = render(json!({"filters":[
            {"or":[{"name":"severity","op":"==","val":"high"},
                   {"and":[{"name":"confirmed","op":"==","val":true},
                           {"name":"name","op":"ilike","val":"%sql%"}]}]},
            {"name":"status","op":"!=","val":"closed"}
        ]}))
        .unwrap();
        assert_eq!(
            sql.unwrap(),
            "((v.severity = $1::severity_level OR (v.confirmed = $2 AND v.name ILIKE $3)) \
             AND v.status <> $4::vulnerability_status)"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn os_predicate_is_native() {
        let (sql, _) =
            render(json!({"filters":[{"name":"host__os","op":"ilike","val":"%linux%"}]})).unwrap();
        assert_eq!(sql.unwrap(), "h.os ILIKE $1");
    }

    #[test]
    fn in_operator_binds_a_list() {
        let (sql, params) =
            render(json!({"filters":[{"name":"id","op":"in","val":[1,2,3]}]})).unwrap();
        assert_eq!(sql.unwrap(), "v.id = ANY($1)");
        assert_eq!(params.values(), &[SqlValue::IntList(vec![1, 2, 3])]);

        let (sql, _) =
            render(json!({"filters":[{"name":"severity","op":"not_in","val":["low"]}]})).unwrap();
        assert_eq!(sql.unwrap(), "v.severity <> ALL($1::severity_level[])");
    }

    #[test]
    fn null_comparisons() {
        let (sql, params) =
            render(json!({"filters":[{"name":"external_id","op":"==","val":null}]})).unwrap();
        assert_eq!(sql.unwrap(), "v.external_id IS NULL");
        assert!(params.is_empty());

        let (sql, _) = render(json!({"filters":[{"name":"website","op":"is_not_null"}]})).unwrap();
        assert_eq!(sql.unwrap(), "v.website IS NOT NULL");
    }

    #[test]
    fn field_to_field_comparison() {
        let (sql, params) = render(
            json!({"filters":[{"name":"create_date","op":"<","field":"update_date"}]}),
        )
        .unwrap();
        assert_eq!(sql.unwrap(), "v.create_date < v.update_date");
        assert!(params.is_empty());
    }

    #[test]
    fn relation_membership() {
        let (sql, _) = render(json!({"filters":[{"name":"tags","op":"any","val":"pci"}]})).unwrap();
        assert_eq!(
            sql.unwrap(),
            "EXISTS (SELECT 1 FROM vulnerability_tags vt JOIN tags r ON r.id = vt.tag_id \
             WHERE vt.vulnerability_id = v.id AND r.name = $1)"
        );

        let (sql, _) = render(json!({"filters":[
            {"name":"refs","op":"has","val":{"name":"name","op":"ilike","val":"%cwe%"}}
        ]}))
        .unwrap();
        assert_eq!(
            sql.unwrap(),
            "EXISTS (SELECT 1 FROM vulnerability_references r WHERE r.vulnerability_id = v.id \
             AND r.name ILIKE $1)"
        );

        let (sql, _) = render(json!({"filters":[{"name":"cve","op":"!=","val":"CVE-2021-44228"}]}))
            .unwrap();
        assert!(sql.unwrap().starts_with("NOT EXISTS"));
    }

    #[test]
    fn unknown_field_is_a_filter_error() {
        let err = render(json!({"filters":[{"name":"nope","op":"==","val":1}]})).unwrap_err();
        assert_eq!(err, FilterError::UnknownField("nope".to_string()));
    }

    #[test]
    fn operator_value_mismatch_is_a_filter_error() {
        assert!(render(json!({"filters":[{"name":"id","op":"like","val":"%1%"}]})).is_err());
        assert!(render(json!({"filters":[{"name":"confirmed","op":"==","val":"perhaps"}]})).is_err());
        assert!(render(json!({"filters":[{"name":"tags","op":">","val":"x"}]})).is_err());
        assert!(render(json!({"filters":[{"name":"name","op":"has","val":"x"}]})).is_err());
    }

    #[test]
    fn order_and_group_resolution() {
        let q = FilterQuery::from_value(&json!({
            "order_by":[{"field":"severity","direction":"desc"},{"field":"name"}],
            "group_by":"severity"
        }))
        .unwrap();
        assert_eq!(
            order_terms(&q.order_by).unwrap(),
            vec!["v.severity DESC", "v.name ASC"]
        );
        let groups = group_columns(&q.group_by).unwrap();
        assert_eq!(groups[0].0, "severity");
        assert_eq!(groups[0].1.expr, "v.severity");
        assert!(group_columns(&["tags".to_string()]).is_err());
    }
}

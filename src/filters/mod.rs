//! Filter-tree query language.
//!
//! Clients send a JSON document such as
//! `{"filters": [{"name": "severity", "op": "==", "val": "high"}], "group_by": "severity"}`.
//! It is parsed into a [`FilterQuery`], hostname predicates are split off by
//! [`hostnames::split_hostname_filters`], and the rest is translated into
//! parameterized SQL by [`translate`].

pub mod fields;
pub mod hostnames;
pub mod translate;
pub mod value;

use serde::Serialize;
use serde_json::Value;

use crate::errors::AppError;

pub use hostnames::split_hostname_filters;

/// Failure while parsing or translating a filter document.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FilterError {
    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("{0}")]
    Schema(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("operator '{op}' cannot be applied to field '{field}'")]
    UnsupportedOperator { field: String, op: String },

    #[error("invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl From<FilterError> for AppError {
    fn from(err: FilterError) -> Self {
        AppError::InvalidFilters(err.to_string())
    }
}

/// Comparison operators accepted in a leaf predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    In,
    NotIn,
    Like,
    ILike,
    NotLike,
    IsNull,
    IsNotNull,
    Has,
    Any,
}

impl Operator {
    pub fn parse(op: &str) -> Result<Self, FilterError> {
        let parsed = match op {
            "==" | "eq" | "equals" | "equal_to" => Self::Eq,
            "!=" | "ne" | "neq" | "not_equal_to" | "does_not_equal" => Self::Ne,
            ">" | "gt" => Self::Gt,
            "<" | "lt" => Self::Lt,
            ">=" | "ge" | "gte" | "geq" => Self::Ge,
            "<=" | "le" | "lte" | "leq" => Self::Le,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            "like" => Self::Like,
            "ilike" => Self::ILike,
            "not_like" => Self::NotLike,
            "is_null" => Self::IsNull,
            "is_not_null" => Self::IsNotNull,
            "has" => Self::Has,
            "any" => Self::Any,
            other => return Err(FilterError::UnknownOperator(other.to_string())),
        };
        Ok(parsed)
    }

    /// SQL token for the plain binary comparisons.
    pub fn comparison(&self) -> Option<&'static str> {
        match self {
            Self::Eq => Some("="),
            Self::Ne => Some("<>"),
            Self::Gt => Some(">"),
            Self::Lt => Some("<"),
            Self::Ge => Some(">="),
            Self::Le => Some("<="),
            _ => None,
        }
    }

    /// Whether the operator ignores `val`.
    pub fn is_unary(&self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

/// A leaf predicate, kept in the shape the client sent it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    pub name: String,
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl Predicate {
    pub fn new(name: &str, op: &str, val: Value) -> Self {
        Self {
            name: name.to_string(),
            op: op.to_string(),
            val: Some(val),
            field: None,
        }
    }

    pub fn operator(&self) -> Result<Operator, FilterError> {
        Operator::parse(&self.op)
    }

    fn from_object(obj: &serde_json::Map<String, Value>) -> Result<Self, FilterError> {
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| FilterError::Schema("filter is missing 'name'".to_string()))?;
        let op = obj
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| FilterError::Schema(format!("filter on '{name}' is missing 'op'")))?;
        let operator = Operator::parse(op)?;

        let field = match obj.get("field") {
            None | Some(Value::Null) => None,
            Some(Value::String(f)) => Some(f.clone()),
            Some(_) => {
                return Err(FilterError::Schema(format!(
                    "'field' of filter on '{name}' must be a string"
                )))
            }
        };
        let val = obj.get("val").cloned();
        if val.is_none() && field.is_none() && !operator.is_unary() {
            return Err(FilterError::Schema(format!(
                "filter on '{name}' requires 'val' or 'field'"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            op: op.to_string(),
            val,
            field,
        })
    }
}

/// A node of the filter tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterNode {
    And { and: Vec<FilterNode> },
    Or { or: Vec<FilterNode> },
    Leaf(Predicate),
}

impl FilterNode {
    pub fn from_value(value: &Value) -> Result<Self, FilterError> {
        let obj = value
            .as_object()
            .ok_or_else(|| FilterError::Schema("each filter must be an object".to_string()))?;

        if let Some(children) = obj.get("or") {
            Ok(Self::Or {
                or: parse_nodes(children, "or")?,
            })
        } else if let Some(children) = obj.get("and") {
            Ok(Self::And {
                and: parse_nodes(children, "and")?,
            })
        } else {
            Predicate::from_object(obj).map(Self::Leaf)
        }
    }

    /// Visit every leaf in depth-first order.
    pub fn leaves(&self) -> Vec<&Predicate> {
        match self {
            Self::Leaf(p) => vec![p],
            Self::And { and: nodes } | Self::Or { or: nodes } => {
                nodes.iter().flat_map(|n| n.leaves()).collect()
            }
        }
    }
}

fn parse_nodes(value: &Value, key: &str) -> Result<Vec<FilterNode>, FilterError> {
    value
        .as_array()
        .ok_or_else(|| FilterError::Schema(format!("'{key}' must be a list of filters")))?
        .iter()
        .map(FilterNode::from_value)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A parsed filter document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterQuery {
    pub filters: Vec<FilterNode>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl FilterQuery {
    /// Parse the raw `q` parameter.
    pub fn parse(raw: &str) -> Result<Self, FilterError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| FilterError::Malformed(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, FilterError> {
        let obj = value
            .as_object()
            .ok_or_else(|| FilterError::Schema("filter document must be an object".to_string()))?;

        let filters = match obj.get("filters") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => parse_nodes(v, "filters")?,
        };

        let group_by = match obj.get("group_by") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(field)) => vec![field.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(field) => Ok(field.clone()),
                    Value::Object(o) => o
                        .get("field")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            FilterError::Schema("group_by entries need a 'field'".to_string())
                        }),
                    _ => Err(FilterError::Schema(
                        "group_by entries must be strings or objects".to_string(),
                    )),
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(FilterError::Schema(
                    "group_by must be a string or a list".to_string(),
                ))
            }
        };

        let order_by = match obj.get("order_by") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(parse_order_by)
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(FilterError::Schema("order_by must be a list".to_string())),
        };

        Ok(Self {
            filters,
            group_by,
            order_by,
            limit: parse_bound(obj.get("limit"), "limit")?,
            offset: parse_bound(obj.get("offset"), "offset")?,
        })
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
    }

    /// Append a leaf to the top-level conjunction.
    pub fn push(&mut self, predicate: Predicate) {
        self.filters.push(FilterNode::Leaf(predicate));
    }

    /// Remove pagination from the document, returning `(limit, offset)`.
    pub fn take_pagination(&mut self) -> (Option<i64>, Option<i64>) {
        (self.limit.take(), self.offset.take())
    }
}

fn parse_order_by(item: &Value) -> Result<OrderBy, FilterError> {
    let obj = item
        .as_object()
        .ok_or_else(|| FilterError::Schema("order_by entries must be objects".to_string()))?;
    let field = obj
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| FilterError::Schema("order_by entries need a 'field'".to_string()))?;
    let direction = match obj.get("direction").and_then(Value::as_str) {
        None => Direction::Asc,
        Some(d) if d.eq_ignore_ascii_case("asc") => Direction::Asc,
        Some(d) if d.eq_ignore_ascii_case("desc") => Direction::Desc,
        Some(d) => {
            return Err(FilterError::Schema(format!("invalid order direction '{d}'")));
        }
    };
    Ok(OrderBy {
        field: field.to_string(),
        direction,
    })
}

fn parse_bound(value: Option<&Value>, key: &str) -> Result<Option<i64>, FilterError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .filter(|n| *n >= 0)
            .map(Some)
            .ok_or_else(|| FilterError::Schema(format!("{key} must be a non-negative integer"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_tree() {
        let q = FilterQuery::parse(
            r#"{"filters":[{"or":[{"name":"severity","op":"==","val":"high"},
                {"and":[{"name":"confirmed","op":"eq","val":true}]}]}],
                "limit":10,"offset":20}"#,
        )
        .unwrap();
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.limit, Some(10));
        assert_eq!(q.offset, Some(20));
        match &q.filters[0] {
            FilterNode::Or { or } => assert_eq!(or.len(), 2),
            other => panic!("expected or node, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = FilterQuery::parse("{not json").unwrap_err();
        assert!(matches!(err, FilterError::Malformed(_)));
        let app: AppError = err.into();
        assert!(matches!(app, AppError::InvalidFilters(_)));
    }

    #[test]
    fn schema_violations_are_rejected() {
        assert!(FilterQuery::parse(r#"{"filters":{"name":"x"}}"#).is_err());
        assert!(FilterQuery::parse(r#"{"filters":[{"op":"=="}]}"#).is_err());
        assert!(FilterQuery::parse(r#"{"filters":[{"name":"name","op":"~~","val":1}]}"#).is_err());
        assert!(FilterQuery::parse(r#"{"filters":[{"name":"name","op":"=="}]}"#).is_err());
        assert!(FilterQuery::parse(r#"{"limit":-1}"#).is_err());
        assert!(FilterQuery::parse(r#"[1,2]"#).is_err());
    }

    #[test]
    fn unary_operators_need_no_value() {
        let q = FilterQuery::parse(r#"{"filters":[{"name":"external_id","op":"is_null"}]}"#)
            .unwrap();
        assert_eq!(q.filters[0].leaves()[0].val, None);
    }

    #[test]
    fn group_by_accepts_string_and_objects() {
        let q = FilterQuery::parse(r#"{"group_by":"severity"}"#).unwrap();
        assert_eq!(q.group_by, vec!["severity"]);
        let q = FilterQuery::parse(r#"{"group_by":[{"field":"severity"},{"field":"status"}]}"#)
            .unwrap();
        assert_eq!(q.group_by, vec!["severity", "status"]);
        assert!(q.is_grouped());
    }

    #[test]
    fn order_by_defaults_to_ascending() {
        let q = FilterQuery::parse(
            r#"{"order_by":[{"field":"name"},{"field":"severity","direction":"DESC"}]}"#,
        )
        .unwrap();
        assert_eq!(q.order_by[0].direction, Direction::Asc);
        assert_eq!(q.order_by[1].direction, Direction::Desc);
    }

    #[test]
    fn take_pagination_clears_bounds() {
        let mut q = FilterQuery::parse(r#"{"limit":5,"offset":2}"#).unwrap();
        assert_eq!(q.take_pagination(), (Some(5), Some(2)));
        assert_eq!(q.limit, None);
        assert_eq!(q.offset, None);
    }

    #[test]
    fn nodes_serialize_in_client_shape() {
        let node = FilterNode::And {
            and: vec![FilterNode::Leaf(Predicate::new("name", "ilike", json!("%sql%")))],
        };
        assert_eq!(
            serde_json::to_value(&node).unwrap(),
            json!({"and":[{"name":"name","op":"ilike","val":"%sql%"}]})
        );
    }

    #[test]
    fn operator_aliases() {
        assert_eq!(Operator::parse("equal_to").unwrap(), Operator::Eq);
        assert_eq!(Operator::parse("does_not_equal").unwrap(), Operator::Ne);
        assert_eq!(Operator::parse("geq").unwrap(), Operator::Ge);
        assert_eq!(Operator::parse("any").unwrap(), Operator::Any);
        assert!(Operator::IsNull.is_unary());
        assert_eq!(Operator::Ne.comparison(), Some("<>"));
    }
}

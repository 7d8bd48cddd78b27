//! Custom field schema lookup and value validation.

use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::errors::AppError;
use crate::models::custom_field::{CustomFieldSchema, CustomFieldType};

/// Vulnerability custom fields in display order.
pub async fn list(pool: &PgPool) -> Result<Vec<CustomFieldSchema>, AppError> {
    let fields = sqlx::query_as::<_, CustomFieldSchema>(
        "SELECT id, table_name, field_name, field_type, field_display_name, field_order \
         FROM custom_fields_schema WHERE table_name = 'vulnerability' \
         ORDER BY field_order, id",
    )
    .fetch_all(pool)
    .await?;
    Ok(fields)
}

/// Validate submitted values against the schema. Keys without a schema
/// entry are dropped; nulls are kept.
pub fn sanitize(schema: &[CustomFieldSchema], input: Map<String, Value>) -> Result<Value, AppError> {
    let mut out = Map::new();
    for (key, value) in input {
        let Some(field) = schema.iter().find(|f| f.field_name == key) else {
            tracing::debug!(field = %key, "Dropping unknown custom field");
            continue;
        };
        if !value.is_null() {
            check_value(field, &value)?;
        }
        out.insert(key, value);
    }
    Ok(Value::Object(out))
}

fn check_value(field: &CustomFieldSchema, value: &Value) -> Result<(), AppError> {
    let ok = match field.kind() {
        CustomFieldType::Int => value.as_i64().is_some(),
        CustomFieldType::List => value
            .as_array()
            .is_some_and(|items| items.iter().all(Value::is_string)),
        CustomFieldType::Str | CustomFieldType::Choice => value.is_string(),
    };
    if ok {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Invalid value for custom field '{}': expected {}",
            field.field_name, field.field_type
        )))
    }
}

/// Render a custom field value as a CSV cell.
pub fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str, field_type: &str, order: i32) -> CustomFieldSchema {
        CustomFieldSchema {
            id: order as i64,
            table_name: "vulnerability".to_string(),
            field_name: name.to_string(),
            field_type: field_type.to_string(),
            field_display_name: name.to_uppercase(),
            field_order: order,
        }
    }

    fn schema() -> Vec<CustomFieldSchema> {
        vec![
            field("cvss_score", "int", 1),
            field("owners", "list", 2),
            field("ticket", "str", 3),
        ]
    }

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let out = sanitize(&schema(), input(json!({"ticket": "JIRA-1", "bogus": 1}))).unwrap();
        assert_eq!(out, json!({"ticket": "JIRA-1"}));
    }

    #[test]
    fn int_fields_require_integers() {
        assert!(sanitize(&schema(), input(json!({"cvss_score": 7}))).is_ok());
        let err = sanitize(&schema(), input(json!({"cvss_score": "seven"}))).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn list_fields_require_string_arrays() {
        assert!(sanitize(&schema(), input(json!({"owners": ["a", "b"]}))).is_ok());
        assert!(sanitize(&schema(), input(json!({"owners": ["a", 1]}))).is_err());
        assert!(sanitize(&schema(), input(json!({"owners": null}))).is_ok());
    }

    #[test]
    fn display_values() {
        assert_eq!(display_value(Some(&json!(["a", "b"]))), "a, b");
        assert_eq!(display_value(Some(&json!(3))), "3");
        assert_eq!(display_value(None), "");
    }
}

//! Schema of the workspace-configurable custom fields.

use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomFieldType {
    Str,
    Int,
    List,
    Choice,
}

impl CustomFieldType {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "str" => Some(Self::Str),
            "int" => Some(Self::Int),
            "list" => Some(Self::List),
            "choice" => Some(Self::Choice),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CustomFieldSchema {
    pub id: i64,
    pub table_name: String,
    pub field_name: String,
    pub field_type: String,
    pub field_display_name: String,
    pub field_order: i32,
}

impl CustomFieldSchema {
    /// Unknown type labels are treated as free text.
    pub fn kind(&self) -> CustomFieldType {
        CustomFieldType::from_label(&self.field_type).unwrap_or(CustomFieldType::Str)
    }
}

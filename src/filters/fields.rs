//! Registry of filterable, sortable and groupable vulnerability fields.
//!
//! Every name a client may reference resolves here to a SQL expression over
//! the aliases of the base vulnerability query (`v`, `s`, `h`, `u`, `c`).
//! Anything not listed is rejected, so client input never reaches the SQL
//! text.

/// Value domain of a column, used to coerce filter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Boolean,
    Timestamp,
    Severity,
    Status,
    EaseOfResolution,
    VulnType,
}

impl FieldKind {
    /// PostgreSQL enum type a bound text value must be cast to.
    pub fn pg_enum(&self) -> Option<&'static str> {
        match self {
            Self::Severity => Some("severity_level"),
            Self::Status => Some("vulnerability_status"),
            Self::EaseOfResolution => Some("ease_of_resolution"),
            Self::VulnType => Some("vulnerability_type"),
            _ => None,
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Text) || self.pg_enum().is_some()
    }
}

/// Collections reached through a join table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Tags,
    References,
    PolicyViolations,
    Cves,
}

impl Relation {
    /// Subquery selecting the related names of `v`, aliased `r.name`.
    pub fn source(&self) -> &'static str {
        match self {
            Self::Tags => {
                "vulnerability_tags vt JOIN tags r ON r.id = vt.tag_id WHERE vt.vulnerability_id = v.id"
            }
            Self::References => "vulnerability_references r WHERE r.vulnerability_id = v.id",
            Self::PolicyViolations => {
                "vulnerability_policy_violations r WHERE r.vulnerability_id = v.id"
            }
            Self::Cves => "vulnerability_cves r WHERE r.vulnerability_id = v.id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub expr: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Column(Column),
    Relation(Relation),
}

const fn col(expr: &'static str, kind: FieldKind) -> Field {
    Field::Column(Column { expr, kind })
}

/// Resolve a client field name.
pub fn resolve(name: &str) -> Option<Field> {
    use FieldKind::*;

    let field = match name {
        "id" | "_id" => col("v.id", Integer),
        "name" => col("v.name", Text),
        "description" | "desc" => col("v.description", Text),
        "data" => col("v.data", Text),
        "resolution" => col("v.resolution", Text),
        "severity" => col("v.severity", Severity),
        "status" => col("v.status", Status),
        "confirmed" => col("v.confirmed", Boolean),
        "ease_of_resolution" | "easeofresolution" => col("v.ease_of_resolution", EaseOfResolution),
        "impact_accountability" => col("v.impact_accountability", Boolean),
        "impact_availability" => col("v.impact_availability", Boolean),
        "impact_confidentiality" => col("v.impact_confidentiality", Boolean),
        "impact_integrity" => col("v.impact_integrity", Boolean),
        "external_id" => col("v.external_id", Text),
        "tool" => col("v.tool", Text),
        "type" => col("v.type", VulnType),
        "host_id" => col("v.host_id", Integer),
        "service_id" => col("v.service_id", Integer),
        "command_id" | "creator_command_id" => col("v.creator_command_id", Integer),
        "create_date" | "date" => col("v.create_date", Timestamp),
        "update_date" => col("v.update_date", Timestamp),

        // Web specialization; NULL on standard rows.
        "method" => col("v.method", Text),
        "path" => col("v.path", Text),
        "parameters" | "params" => col("v.parameters", Text),
        "parameter_name" | "pname" => col("v.parameter_name", Text),
        "query_string" | "query" => col("v.query_string", Text),
        "request" => col("v.request", Text),
        "response" => col("v.response", Text),
        "website" => col("v.website", Text),
        "status_code" => col("v.status_code", Integer),

        // Host reached directly or through the service.
        "target" | "host__ip" => col("h.ip", Text),
        "host_os" | "host__os" | "target_host_os" => col("h.os", Text),
        "service__name" | "service" => col("s.name", Text),
        "service__port" => col("s.port", Integer),
        "service__protocol" => col("s.protocol", Text),
        "creator" | "creator_command_tool" => col("c.tool", Text),
        "creator__username" | "owner" => col("u.username", Text),

        "tags" => Field::Relation(Relation::Tags),
        "refs" | "references" => Field::Relation(Relation::References),
        "policyviolations" | "policy_violations" => Field::Relation(Relation::PolicyViolations),
        "cve" => Field::Relation(Relation::Cves),

        _ => return None,
    };
    Some(field)
}

/// Resolve a field that must be a plain column (ordering, grouping).
pub fn resolve_column(name: &str) -> Option<Column> {
    match resolve(name)? {
        Field::Column(c) => Some(c),
        Field::Relation(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_aliases_resolve_to_host_os() {
        for name in ["host_os", "host__os", "target_host_os"] {
            assert_eq!(resolve_column(name).unwrap().expr, "h.os");
        }
    }

    #[test]
    fn relations_are_not_columns() {
        assert_eq!(resolve("tags"), Some(Field::Relation(Relation::Tags)));
        assert!(resolve_column("refs").is_none());
    }

    #[test]
    fn unknown_fields_do_not_resolve() {
        assert!(resolve("hostnames").is_none());
        assert!(resolve("v.name; DROP TABLE users").is_none());
    }

    #[test]
    fn enum_kinds_carry_pg_types() {
        assert_eq!(FieldKind::Severity.pg_enum(), Some("severity_level"));
        assert_eq!(FieldKind::Text.pg_enum(), None);
        assert!(FieldKind::Status.is_textual());
        assert!(!FieldKind::Integer.is_textual());
    }
}

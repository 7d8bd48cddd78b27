//! CSV export of serialized vulnerabilities.

use csv::WriterBuilder;

use crate::errors::AppError;
use crate::models::custom_field::CustomFieldSchema;
use crate::models::vulnerability::VulnerabilityView;
use crate::services::custom_fields;

const HEADERS: [&str; 35] = [
    "confirmed",
    "id",
    "date",
    "name",
    "severity",
    "service",
    "target",
    "desc",
    "status",
    "hostnames",
    "owner",
    "os",
    "resolution",
    "refs",
    "cve",
    "easeofresolution",
    "web_vulnerability",
    "data",
    "website",
    "path",
    "status_code",
    "request",
    "response",
    "method",
    "params",
    "pname",
    "query",
    "policyviolations",
    "external_id",
    "impact_confidentiality",
    "impact_integrity",
    "impact_availability",
    "impact_accountability",
    "tags",
    "update_date",
];

/// Attachment filename of an export.
pub fn filename(workspace: &str) -> String {
    format!("Faraday-SR-{workspace}.csv")
}

fn csv_error(e: impl std::fmt::Display) -> AppError {
    AppError::Internal(format!("CSV export failed: {e}"))
}

fn row(view: &VulnerabilityView, custom_columns: &[CustomFieldSchema]) -> Vec<String> {
    let web = view.web.as_ref();
    let web_field = |f: fn(&crate::models::vulnerability::WebView) -> String| {
        web.map(f).unwrap_or_default()
    };

    let mut record = vec![
        view.confirmed.to_string(),
        view.id.to_string(),
        view.date.to_rfc3339(),
        view.name.clone(),
        view.severity.api_label().to_string(),
        view.service
            .as_ref()
            .map(|s| s.summary.clone())
            .unwrap_or_default(),
        view.target.clone().unwrap_or_default(),
        view.description.clone(),
        view.status.label().to_string(),
        view.hostnames.join(","),
        view.owner.clone().unwrap_or_default(),
        view.host_os.clone().unwrap_or_default(),
        view.resolution.clone(),
        view.refs.join(","),
        view.cve.join(","),
        view.easeofresolution
            .map(|e| e.label().to_string())
            .unwrap_or_default(),
        web.is_some().to_string(),
        view.data.clone(),
        web_field(|w| w.website.clone()),
        web_field(|w| w.path.clone()),
        web_field(|w| w.status_code.map(|c| c.to_string()).unwrap_or_default()),
        web_field(|w| w.request.clone()),
        web_field(|w| w.response.clone()),
        web_field(|w| w.method.clone()),
        web_field(|w| w.params.clone()),
        web_field(|w| w.pname.clone()),
        web_field(|w| w.query.clone()),
        view.policyviolations.join(","),
        view.external_id.clone().unwrap_or_default(),
        view.impact.confidentiality.to_string(),
        view.impact.integrity.to_string(),
        view.impact.availability.to_string(),
        view.impact.accountability.to_string(),
        view.tags.join(","),
        view.metadata.update_time.to_rfc3339(),
    ];

    for field in custom_columns {
        record.push(custom_fields::display_value(
            view.custom_fields.get(&field.field_name),
        ));
    }
    record
}

/// Render `views` as CSV with one extra column per custom field, in schema order.
pub fn export_csv(
    views: &[VulnerabilityView],
    custom_columns: &[CustomFieldSchema],
) -> Result<Vec<u8>, AppError> {
    let mut wtr = WriterBuilder::new().has_headers(true).from_writer(vec![]);

    let mut headers: Vec<&str> = HEADERS.to_vec();
    headers.extend(custom_columns.iter().map(|f| f.field_name.as_str()));
    wtr.write_record(&headers).map_err(csv_error)?;

    for view in views {
        wtr.write_record(row(view, custom_columns)).map_err(csv_error)?;
    }

    wtr.into_inner().map_err(csv_error)
}

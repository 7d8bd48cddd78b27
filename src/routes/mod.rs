//! Route definitions for the vulntrack API.

pub mod attachments;
pub mod auth;
pub mod health;
pub mod vulns;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600));

    match HeaderValue::from_str(frontend_url) {
        Ok(origin) => cors.allow_origin(origin),
        Err(e) => {
            tracing::warn!(frontend_url, error = %e, "Invalid FRONTEND_URL, cross-origin requests disabled");
            cors
        }
    }
}

/// `Content-Disposition` value for a download named `filename`. The name is
/// quoted; quotes and backslashes are escaped and bytes outside printable
/// ASCII become `_`.
pub(crate) fn attachment_disposition(filename: &str) -> String {
    let mut quoted = String::with_capacity(filename.len() + 2);
    for c in filename.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            ' '..='~' => quoted.push(c),
            _ => quoted.push('_'),
        }
    }
    format!("attachment; filename=\"{quoted}\"")
}

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/token", get(auth::token))
        .route("/session", get(auth::current_session));

    // Static segments are matched before `{id}`.
    let vuln_routes = Router::new()
        .route(
            "/vulns",
            get(vulns::list)
                .post(vulns::create)
                .delete(vulns::bulk_delete)
                .patch(vulns::bulk_update),
        )
        .route("/vulns/filter", get(vulns::filter))
        .route("/vulns/export_csv", get(vulns::export_csv))
        .route("/vulns/count", get(vulns::count))
        .route("/vulns/top_users", get(vulns::top_users))
        .route(
            "/vulns/{id}",
            get(vulns::get_by_id)
                .put(vulns::replace)
                .patch(vulns::patch)
                .delete(vulns::delete),
        )
        .route(
            "/vulns/{id}/attachment",
            post(attachments::upload).get(attachments::list),
        )
        .route(
            "/vulns/{id}/attachment/{filename}",
            get(attachments::download).delete(attachments::delete),
        );

    Router::new()
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .nest("/api/v1", auth_routes)
        .nest("/api/v1/ws/{workspace}", vuln_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.frontend_url))
                .layer(CompressionLayer::new())
                .layer(DefaultBodyLimit::max(state.config.max_upload_bytes)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_accepts_invalid_origin_without_panicking() {
        let _ = cors_layer("http://localhost:5173");
        let _ = cors_layer("bad\norigin");
    }

    #[test]
    fn disposition_filename_is_quoted_and_escaped() {
        assert_eq!(
            attachment_disposition("report.csv"),
            "attachment; filename=\"report.csv\""
        );
        assert_eq!(
            attachment_disposition("a;b\"c\\d.txt"),
            "attachment; filename=\"a;b\\\"c\\\\d.txt\""
        );
        assert_eq!(
            attachment_disposition("x\r\ny=évil.txt"),
            "attachment; filename=\"x__y=_vil.txt\""
        );
        assert!(HeaderValue::from_str(&attachment_disposition("naïve\n.txt")).is_ok());
    }
}

//! Evidence routes under `/api/v1/ws/{workspace}/vulns/{id}/attachment`.

use std::collections::BTreeMap;

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::middleware::auth::CurrentUser;
use crate::middleware::rbac::RequireWriter;
use crate::models::attachment::{EvidenceView, FileRecord, NewAttachment};
use crate::routes::attachment_disposition;
use crate::services::attachment::{self as attachment_service, guess_content_type};
use crate::services::{vulnerability as vuln_service, workspace as workspace_service};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

fn content_disposition(record: &FileRecord) -> String {
    if record.is_image() {
        "inline".to_string()
    } else {
        attachment_disposition(&record.filename)
    }
}

/// POST /api/v1/ws/{workspace}/vulns/{id}/attachment — multipart upload of a
/// single `file`.
pub async fn upload(
    State(state): State<AppState>,
    RequireWriter(user): RequireWriter,
    Path((workspace, id)): Path<(String, i64)>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let workspace = workspace_service::resolve_writable(&state.db, &workspace).await?;
    vuln_service::ensure_exists(&state.db, workspace.id, id).await?;

    let mut upload: Option<NewAttachment> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Multipart error: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        if upload.is_some() {
            return Err(AppError::BadRequest(
                "Only one 'file' field is allowed".to_string(),
            ));
        }
        let filename = field
            .file_name()
            .filter(|n| !n.is_empty())
            .map(|n| n.replace(' ', "_"))
            .ok_or_else(|| AppError::BadRequest("Uploaded file has no filename".to_string()))?;
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(&filename).to_string());
        let content = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read file: {e}")))?;
        upload = Some(NewAttachment {
            filename,
            content_type,
            content: content.to_vec(),
        });
    }

    let upload = upload.ok_or_else(|| {
        AppError::BadRequest("Missing 'file' field in multipart request".to_string())
    })?;
    attachment_service::upload(&state.db, &state.depot, id, upload, user.id).await?;

    Ok((
        StatusCode::OK,
        Json(Message {
            message: "Evidence upload was successful".to_string(),
        }),
    ))
}

/// GET /api/v1/ws/{workspace}/vulns/{id}/attachment — all evidence, base64.
pub async fn list(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path((workspace, id)): Path<(String, i64)>,
) -> Result<Json<BTreeMap<String, EvidenceView>>, AppError> {
    let workspace = workspace_service::resolve(&state.db, &workspace).await?;
    vuln_service::ensure_exists(&state.db, workspace.id, id).await?;
    let evidence = attachment_service::list(&state.db, &state.depot, id).await?;
    Ok(Json(evidence))
}

/// GET /api/v1/ws/{workspace}/vulns/{id}/attachment/{filename} — raw content.
pub async fn download(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path((workspace, id, filename)): Path<(String, i64, String)>,
) -> Result<Response, AppError> {
    let workspace = workspace_service::resolve(&state.db, &workspace).await?;
    vuln_service::ensure_exists(&state.db, workspace.id, id).await?;
    let (record, content) =
        attachment_service::fetch(&state.db, &state.depot, id, &filename).await?;

    Ok((
        [
            (header::CONTENT_TYPE, record.content_type.clone()),
            (header::CONTENT_DISPOSITION, content_disposition(&record)),
        ],
        content,
    )
        .into_response())
}

/// DELETE /api/v1/ws/{workspace}/vulns/{id}/attachment/{filename}.
pub async fn delete(
    State(state): State<AppState>,
    RequireWriter(_user): RequireWriter,
    Path((workspace, id, filename)): Path<(String, i64, String)>,
) -> Result<Json<Message>, AppError> {
    let workspace = workspace_service::resolve_writable(&state.db, &workspace).await?;
    vuln_service::ensure_exists(&state.db, workspace.id, id).await?;
    attachment_service::delete(&state.db, &state.depot, id, &filename).await?;
    Ok(Json(Message {
        message: "Attachment was successfully deleted".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(filename: &str, content_type: &str) -> FileRecord {
        FileRecord {
            id: 1,
            object_type: "vulnerability".to_string(),
            object_id: 7,
            name: "shot".to_string(),
            filename: filename.to_string(),
            file_id: "abcd".to_string(),
            content_type: content_type.to_string(),
            content_hash: String::new(),
            size: 0,
            creator_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn images_render_inline() {
        assert_eq!(content_disposition(&record("shot.png", "image/png")), "inline");
        assert_eq!(
            content_disposition(&record("dump.txt", "text/plain")),
            "attachment; filename=\"dump.txt\""
        );
    }
}

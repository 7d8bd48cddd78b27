//! Vulnerability evidence: `files` rows plus blobs in the depot.
//!
//! Rows are written inside the caller's transaction; blobs are written
//! before the row that points at them. Callers collect the ids of blobs
//! written for a transaction that later fails and remove them with
//! [`Depot::delete_all`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::attachment::{
    AttachmentPayload, EvidenceView, FileRecord, NewAttachment, DEFAULT_CONTENT_TYPE,
    VULNERABILITY_OBJECT,
};
use crate::services::storage::Depot;

const FILE_COLUMNS: &str = "id, object_type, object_id, name, filename, file_id, content_type, \
     content_hash, size, creator_id, created_at";

/// Guess a content type from the file extension.
pub fn guess_content_type(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("txt" | "log") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("xml") => "application/xml",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Decode `_attachments` from a JSON body. Spaces in names become `_`.
pub fn decode_payloads(
    payloads: BTreeMap<String, AttachmentPayload>,
) -> Result<Vec<NewAttachment>, AppError> {
    payloads
        .into_iter()
        .map(|(name, payload)| {
            let filename = name.replace(' ', "_");
            let content = STANDARD.decode(payload.data.trim()).map_err(|e| {
                AppError::Validation(format!("Attachment '{name}' is not valid base64: {e}"))
            })?;
            let content_type = payload
                .content_type
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| guess_content_type(&filename).to_string());
            Ok(NewAttachment {
                filename,
                content_type,
                content,
            })
        })
        .collect()
}

fn stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string()
}

/// Store blobs and insert their rows. Ids of written blobs are appended to
/// `written` as soon as they exist.
pub async fn insert_all(
    tx: &mut Transaction<'_, Postgres>,
    depot: &Depot,
    vuln_id: i64,
    attachments: &[NewAttachment],
    creator_id: Option<Uuid>,
    written: &mut Vec<String>,
) -> Result<(), AppError> {
    for attachment in attachments {
        let blob = depot.store(&attachment.content).await?;
        written.push(blob.file_id.clone());

        sqlx::query(
            "INSERT INTO files (object_type, object_id, name, filename, file_id, content_type, \
             content_hash, size, creator_id) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(VULNERABILITY_OBJECT)
        .bind(vuln_id)
        .bind(stem(&attachment.filename))
        .bind(&attachment.filename)
        .bind(&blob.file_id)
        .bind(&attachment.content_type)
        .bind(&blob.content_hash)
        .bind(blob.size)
        .bind(creator_id)
        .execute(&mut **tx)
        .await
        .map_err(duplicate_evidence)?;
    }
    Ok(())
}

/// A second row for the same vulnerability and filename is a client error.
fn duplicate_evidence(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::BadRequest("Evidence already exists in vuln".to_string())
        }
        _ => AppError::Database(e),
    }
}

/// Delete the rows of every attachment of `vuln_ids`, returning the blob ids
/// to remove once the transaction commits.
pub async fn delete_rows_for(
    tx: &mut Transaction<'_, Postgres>,
    vuln_ids: &[i64],
) -> Result<Vec<String>, AppError> {
    let file_ids = sqlx::query_scalar::<_, String>(
        "DELETE FROM files WHERE object_type = $1 AND object_id = ANY($2) RETURNING file_id",
    )
    .bind(VULNERABILITY_OBJECT)
    .bind(vuln_ids)
    .fetch_all(&mut **tx)
    .await?;
    Ok(file_ids)
}

/// Full replace of a vulnerability's attachment set. Returns the blob ids of
/// the replaced rows.
pub async fn replace_all(
    tx: &mut Transaction<'_, Postgres>,
    depot: &Depot,
    vuln_id: i64,
    attachments: &[NewAttachment],
    creator_id: Option<Uuid>,
    written: &mut Vec<String>,
) -> Result<Vec<String>, AppError> {
    let old = delete_rows_for(tx, &[vuln_id]).await?;
    insert_all(tx, depot, vuln_id, attachments, creator_id, written).await?;
    Ok(old)
}

async fn records_for(pool: &PgPool, vuln_ids: &[i64]) -> Result<Vec<FileRecord>, AppError> {
    let records = sqlx::query_as::<_, FileRecord>(&format!(
        "SELECT {FILE_COLUMNS} FROM files \
         WHERE object_type = $1 AND object_id = ANY($2) ORDER BY filename"
    ))
    .bind(VULNERABILITY_OBJECT)
    .bind(vuln_ids)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

/// Base64 evidence of each vulnerability, keyed by filename. Unreadable
/// blobs are logged and left out.
pub async fn evidence_for(
    pool: &PgPool,
    depot: &Depot,
    vuln_ids: &[i64],
) -> Result<HashMap<i64, BTreeMap<String, EvidenceView>>, AppError> {
    let mut out: HashMap<i64, BTreeMap<String, EvidenceView>> = HashMap::new();
    if vuln_ids.is_empty() {
        return Ok(out);
    }

    for record in records_for(pool, vuln_ids).await? {
        let content = match depot.retrieve(&record.file_id).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                tracing::warn!(
                    vuln_id = record.object_id,
                    filename = %record.filename,
                    file_id = %record.file_id,
                    "Attachment content missing from depot"
                );
                continue;
            }
            Err(e) => {
                tracing::warn!(
                    vuln_id = record.object_id,
                    filename = %record.filename,
                    error = %e,
                    "Failed to read attachment content"
                );
                continue;
            }
        };
        out.entry(record.object_id).or_default().insert(
            record.filename.clone(),
            EvidenceView {
                content_type: record.content_type.clone(),
                data: STANDARD.encode(content),
            },
        );
    }
    Ok(out)
}

/// Evidence map of one vulnerability.
pub async fn list(
    pool: &PgPool,
    depot: &Depot,
    vuln_id: i64,
) -> Result<BTreeMap<String, EvidenceView>, AppError> {
    let mut all = evidence_for(pool, depot, &[vuln_id]).await?;
    Ok(all.remove(&vuln_id).unwrap_or_default())
}

/// Add one uploaded file. An existing filename is rejected before anything
/// is written.
pub async fn upload(
    pool: &PgPool,
    depot: &Depot,
    vuln_id: i64,
    attachment: NewAttachment,
    creator_id: Uuid,
) -> Result<(), AppError> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM files \
         WHERE object_type = $1 AND object_id = $2 AND filename = $3)",
    )
    .bind(VULNERABILITY_OBJECT)
    .bind(vuln_id)
    .bind(&attachment.filename)
    .fetch_one(pool)
    .await?;
    if exists {
        return Err(AppError::BadRequest(
            "Evidence already exists in vuln".to_string(),
        ));
    }

    let mut written = Vec::new();
    let mut tx = pool.begin().await?;
    let result = insert_all(
        &mut tx,
        depot,
        vuln_id,
        std::slice::from_ref(&attachment),
        Some(creator_id),
        &mut written,
    )
    .await;
    let result = match result {
        Ok(()) => tx.commit().await.map_err(AppError::from),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        depot.delete_all(&written).await;
        return Err(e);
    }

    tracing::info!(
        vuln_id,
        filename = %attachment.filename,
        size = attachment.content.len(),
        "Evidence upload was successful"
    );
    Ok(())
}

/// Row and content of one attachment.
pub async fn fetch(
    pool: &PgPool,
    depot: &Depot,
    vuln_id: i64,
    filename: &str,
) -> Result<(FileRecord, Vec<u8>), AppError> {
    let record = sqlx::query_as::<_, FileRecord>(&format!(
        "SELECT {FILE_COLUMNS} FROM files \
         WHERE object_type = $1 AND object_id = $2 AND filename = $3"
    ))
    .bind(VULNERABILITY_OBJECT)
    .bind(vuln_id)
    .bind(filename)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    let content = depot.retrieve(&record.file_id).await?.ok_or_else(|| {
        tracing::warn!(vuln_id, filename, file_id = %record.file_id, "Attachment content missing from depot");
        AppError::NotFound("File not found".to_string())
    })?;
    Ok((record, content))
}

/// Delete the row, then the blob.
pub async fn delete(
    pool: &PgPool,
    depot: &Depot,
    vuln_id: i64,
    filename: &str,
) -> Result<(), AppError> {
    let file_id = sqlx::query_scalar::<_, String>(
        "DELETE FROM files WHERE object_type = $1 AND object_id = $2 AND filename = $3 \
         RETURNING file_id",
    )
    .bind(VULNERABILITY_OBJECT)
    .bind(vuln_id)
    .bind(filename)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    depot.delete_all(std::slice::from_ref(&file_id)).await;
    tracing::info!(vuln_id, filename, "Attachment was successfully deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};

    fn payload(content_type: Option<&str>, data: &str) -> AttachmentPayload {
        AttachmentPayload {
            content_type: content_type.map(str::to_string),
            data: data.to_string(),
        }
    }

    #[test]
    fn payloads_are_decoded_and_renamed() {
        let mut map = BTreeMap::new();
        map.insert("my shot.png".to_string(), payload(None, "aGVsbG8="));
        map.insert("notes".to_string(), payload(Some("text/markdown"), "aGk="));

        let decoded = decode_payloads(map).unwrap();
        assert_eq!(decoded[0].filename, "my_shot.png");
        assert_eq!(decoded[0].content_type, "image/png");
        assert_eq!(decoded[0].content, b"hello");
        assert_eq!(decoded[1].content_type, "text/markdown");
    }

    #[test]
    fn invalid_base64_is_a_validation_error() {
        let mut map = BTreeMap::new();
        map.insert("a.txt".to_string(), payload(None, "%%%"));
        assert!(matches!(decode_payloads(map), Err(AppError::Validation(_))));
    }

    #[test]
    fn content_type_guessing() {
        assert_eq!(guess_content_type("x.JPG"), "image/jpeg");
        assert_eq!(guess_content_type("dump.bin"), DEFAULT_CONTENT_TYPE);
        assert_eq!(guess_content_type("README"), DEFAULT_CONTENT_TYPE);
    }

    #[derive(Debug)]
    struct UniqueViolation;

    impl std::fmt::Display for UniqueViolation {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("duplicate key value violates unique constraint")
        }
    }

    impl std::error::Error for UniqueViolation {}

    impl DatabaseError for UniqueViolation {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn concurrent_duplicate_upload_is_a_bad_request() {
        let err = duplicate_evidence(sqlx::Error::Database(Box::new(UniqueViolation)));
        match err {
            AppError::BadRequest(msg) => assert_eq!(msg, "Evidence already exists in vuln"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            duplicate_evidence(sqlx::Error::RowNotFound),
            AppError::Database(_)
        ));
    }

    #[test]
    fn stem_drops_extension() {
        assert_eq!(stem("report.final.pdf"), "report.final");
        assert_eq!(stem("noext"), "noext");
    }
}

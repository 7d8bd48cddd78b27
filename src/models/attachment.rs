//! Evidence files attached to vulnerabilities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// `files.object_type` of vulnerability evidence.
pub const VULNERABILITY_OBJECT: &str = "vulnerability";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, FromRow)]
pub struct FileRecord {
    pub id: i64,
    pub object_type: String,
    pub object_id: i64,
    pub name: String,
    pub filename: String,
    pub file_id: String,
    pub content_type: String,
    pub content_hash: String,
    pub size: i64,
    pub creator_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Images are rendered inline, everything else is downloaded.
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

/// Attachment as serialized in JSON: base64 content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceView {
    pub content_type: String,
    pub data: String,
}

/// Attachment as accepted in a create/update body.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentPayload {
    pub content_type: Option<String>,
    pub data: String,
}

/// Decoded attachment ready to be stored.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

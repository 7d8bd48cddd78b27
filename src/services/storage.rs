//! Filesystem depot holding attachment content.
//!
//! ## Layout
//!
//! ```ignore
//! <base>/
//!   <file_id[0..2]>/
//!     <file_id[2..4]>/
//!       <file_id>
//! ```
//!
//! File ids are random UUIDs rendered as 32 hex characters, so the two
//! directory levels spread entries evenly.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::fs::{self, create_dir_all};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const NUM_LEVELS: usize = 2;

/// Result of storing a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub file_id: String,
    pub content_hash: String,
    pub size: i64,
}

#[derive(Clone, Debug)]
pub struct Depot {
    base: PathBuf,
}

impl Depot {
    pub async fn new(base: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let base = base.into();
        create_dir_all(&base)
            .await
            .or_else(|err| {
                if err.kind() == ErrorKind::AlreadyExists {
                    Ok(())
                } else {
                    Err(err)
                }
            })
            .with_context(|| format!("unable to create depot directory: {}", base.display()))?;
        Ok(Self { base })
    }

    /// Write `content` under a fresh file id.
    pub async fn store(&self, content: &[u8]) -> std::io::Result<StoredBlob> {
        let file_id = Uuid::new_v4().simple().to_string();
        let dir = level_dir(&self.base, &file_id, NUM_LEVELS);
        create_dir_all(&dir).await?;

        // Write beside the target and rename, so readers never see a partial file.
        let partial = dir.join(format!("{file_id}.part"));
        let mut file = fs::File::create(&partial).await?;
        file.write_all(content).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&partial, dir.join(&file_id)).await?;

        tracing::debug!(file_id = %file_id, size = content.len(), "Stored blob");

        Ok(StoredBlob {
            content_hash: hex::encode(Sha256::digest(content)),
            size: content.len() as i64,
            file_id,
        })
    }

    /// Read a blob. `Ok(None)` when it does not exist.
    pub async fn retrieve(&self, file_id: &str) -> std::io::Result<Option<Vec<u8>>> {
        let path = self.path_of(file_id)?;
        match fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Remove a blob. Removing a missing blob is not an error.
    pub async fn delete(&self, file_id: &str) -> std::io::Result<()> {
        let path = self.path_of(file_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Best-effort removal used for cleanup paths; failures are logged.
    pub async fn delete_all(&self, file_ids: &[String]) {
        for file_id in file_ids {
            if let Err(e) = self.delete(file_id).await {
                tracing::warn!(file_id = %file_id, error = %e, "Failed to delete blob");
            }
        }
    }

    /// Whether the base directory is reachable.
    pub async fn is_available(&self) -> bool {
        fs::metadata(&self.base)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    fn path_of(&self, file_id: &str) -> std::io::Result<PathBuf> {
        if file_id.len() < NUM_LEVELS * 2 || !file_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid file id: {file_id}"),
            ));
        }
        Ok(level_dir(&self.base, file_id, NUM_LEVELS).join(file_id))
    }
}

fn level_dir(base: impl AsRef<Path>, id: &str, levels: usize) -> PathBuf {
    let mut path = base.as_ref().to_path_buf();
    for level in 0..levels {
        path = path.join(&id[level * 2..level * 2 + 2]);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_level_dir() {
        assert_eq!(level_dir("/", "1234567890", 2), Path::new("/12/34"));
    }

    #[tokio::test]
    async fn store_retrieve_delete() {
        let dir = tempdir().unwrap();
        let depot = Depot::new(dir.path()).await.unwrap();

        let blob = depot.store(b"Hello World").await.unwrap();
        assert_eq!(blob.file_id.len(), 32);
        assert_eq!(blob.size, 11);
        assert_eq!(
            blob.content_hash,
            "a591a6d40bf420404a011733cfb7b190d62c65bf0bcda32b57b277d9ad9f146e"
        );

        let target = dir
            .path()
            .join(&blob.file_id[0..2])
            .join(&blob.file_id[2..4])
            .join(&blob.file_id);
        assert!(target.exists());

        let content = depot.retrieve(&blob.file_id).await.unwrap();
        assert_eq!(content.as_deref(), Some(&b"Hello World"[..]));

        depot.delete(&blob.file_id).await.unwrap();
        assert!(depot.retrieve(&blob.file_id).await.unwrap().is_none());
        // second delete is a no-op
        depot.delete(&blob.file_id).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let dir = tempdir().unwrap();
        let depot = Depot::new(dir.path()).await.unwrap();
        let err = depot.retrieve("../../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn availability_follows_base_dir() {
        let dir = tempdir().unwrap();
        let depot = Depot::new(dir.path().join("nested")).await.unwrap();
        assert!(depot.is_available().await);
    }
}

// File-backed BlobStore Implementation
// Layout: <dir>/<id>.bin (module bytes) + <dir>/<id>.json (BlobInfo)

use async_trait::async_trait;
use conveyor_core::domain::{BlobDescriptor, BlobInfo};
use conveyor_core::error::{AppError, Result};
use conveyor_core::port::{BlobStore, BlobStream};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{info, warn};

const BLOB_EXTENSION: &str = "bin";
const INFO_EXTENSION: &str = "json";

pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store module bytes and their information, replacing any previous blob
    pub async fn put(&self, id: &str, bytes: &[u8], info: &BlobInfo) -> Result<()> {
        validate_blob_id(id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        tokio::fs::write(self.blob_path(id), bytes).await?;
        let json = serde_json::to_vec_pretty(info)?;
        tokio::fs::write(self.info_path(id), json).await?;

        info!(blob_id = %id, size = %bytes.len(), "Blob stored");
        Ok(())
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, BLOB_EXTENSION))
    }

    fn info_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, INFO_EXTENSION))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn open(&self, id: &str) -> Result<Option<BlobStream>> {
        validate_blob_id(id)?;
        match tokio::fs::File::open(self.blob_path(id)).await {
            Ok(file) => Ok(Some(Box::pin(file))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_info(&self, id: &str) -> Result<Option<BlobInfo>> {
        validate_blob_id(id)?;
        if !tokio::fs::try_exists(self.blob_path(id)).await? {
            return Ok(None);
        }

        match tokio::fs::read(self.info_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            // Bytes without a sidecar: a plain, unbound module
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Some(BlobInfo::new(
                format!("{}.{}", id, BLOB_EXTENSION),
                "application/octet-stream",
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<BlobDescriptor>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(id.to_string());
            }
        }
        ids.sort();

        let mut descriptors = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_info(&id).await {
                Ok(Some(info)) => descriptors.push(BlobDescriptor { id, info }),
                Ok(None) => {}
                Err(e) => warn!(blob_id = %id, error = %e, "Skipping unreadable blob"),
            }
        }
        Ok(descriptors)
    }
}

fn validate_blob_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.chars().all(|c| c == '.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid blob id: '{}'", id)))
    }
}

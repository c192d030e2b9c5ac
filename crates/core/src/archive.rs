use crate::error::Result;
use crate::ingest::digest_bytes;
use crate::IngestError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub const CONTENT_TYPE: &str = "Content-Type";

/// Keeps the raw uploaded file. Archiving never gates indexing; callers log
/// failures and move on.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `local_path` as `bucket/object_name` and returns its etag.
    async fn put(
        &self,
        bucket: &str,
        object_name: &str,
        local_path: &Path,
        metadata: &Map<String, Value>,
    ) -> Result<String>;
}

/// Blob store on the local filesystem: objects land at
/// `<root>/<bucket>/<object_name>` with a `.meta.json` sidecar.
#[derive(Debug, Clone)]
pub struct DirectoryBlobStore {
    root: PathBuf,
}

impl DirectoryBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, object_name: &str) -> Result<PathBuf> {
        let relative = Path::new(bucket).join(object_name);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if escapes || bucket.is_empty() || object_name.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "invalid object name: {bucket}/{object_name}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

fn sidecar_path(object: &Path) -> PathBuf {
    let mut name = object.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

#[async_trait]
impl BlobStore for DirectoryBlobStore {
    async fn put(
        &self,
        bucket: &str,
        object_name: &str,
        local_path: &Path,
        metadata: &Map<String, Value>,
    ) -> Result<String> {
        let target = self.object_path(bucket, object_name)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::read(local_path).await?;
        tokio::fs::write(&target, &bytes).await?;

        let etag = digest_bytes(&bytes);
        let sidecar = json!({
            "etag": etag,
            "stored_at": Utc::now().to_rfc3339(),
            "metadata": metadata,
        });
        tokio::fs::write(sidecar_path(&target), serde_json::to_vec_pretty(&sidecar)?).await?;

        debug!(object = %target.display(), %etag, "archived upload");
        Ok(etag)
    }
}

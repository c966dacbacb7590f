//! Directory-backed audit store: one JSON document per row

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::audit::record::StoredDeploymentLog;
use crate::audit::store::LogStore;
use crate::errors::DeployctlError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

const ROW_EXTENSION: &str = "json";

/// Stores each row as `<id>.json` under a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: Dir,
}

impl FileStore {
    /// Open the store, creating the directory if needed
    pub async fn open(dir: Dir) -> Result<Self, DeployctlError> {
        dir.create().await?;
        debug!("Opened audit store at {}", dir.path().display());
        Ok(Self { dir })
    }

    fn row_file(&self, id: &str) -> Result<File, DeployctlError> {
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(DeployctlError::StorageError(format!("invalid row id {:?}", id)));
        }
        Ok(self.dir.file(&format!("{}.{}", id, ROW_EXTENSION)))
    }

    async fn read_all(&self) -> Result<Vec<(File, StoredDeploymentLog)>, DeployctlError> {
        let mut rows = Vec::new();
        for file in self.dir.list_files_with_extension(ROW_EXTENSION).await? {
            match file.read_json::<StoredDeploymentLog>().await {
                Ok(row) => rows.push((file, row)),
                Err(e) => warn!("Skipping unreadable audit row {}: {}", file.path().display(), e),
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl LogStore for FileStore {
    async fn insert(&self, row: StoredDeploymentLog) -> Result<(), DeployctlError> {
        let file = self.row_file(&row.id)?;
        if file.exists().await {
            return Err(DeployctlError::StorageError(format!("duplicate id {}", row.id)));
        }
        file.write_json(&row).await
    }

    async fn replace(&self, row: StoredDeploymentLog) -> Result<(), DeployctlError> {
        let file = self.row_file(&row.id)?;
        if !file.exists().await {
            return Err(DeployctlError::NotFound(format!("deployment log {}", row.id)));
        }
        file.write_json(&row).await
    }

    async fn get(&self, id: &str) -> Result<Option<StoredDeploymentLog>, DeployctlError> {
        let file = self.row_file(id)?;
        if !file.exists().await {
            return Ok(None);
        }
        file.read_json().await.map(Some)
    }

    async fn list(&self) -> Result<Vec<StoredDeploymentLog>, DeployctlError> {
        Ok(self.read_all().await?.into_iter().map(|(_, row)| row).collect())
    }

    async fn delete_started_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DeployctlError> {
        let mut deleted = 0;
        for (file, row) in self.read_all().await? {
            if row.started_at < cutoff {
                file.delete().await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

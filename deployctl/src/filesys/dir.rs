//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::DeployctlError;
use crate::filesys::file::File;

#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory and any missing parents
    pub async fn create(&self) -> Result<(), DeployctlError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Remove the directory and everything below it. Missing is not an error.
    pub async fn delete(&self) -> Result<(), DeployctlError> {
        match fs::remove_dir_all(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Regular files directly inside the directory, sorted by path
    pub async fn list_files(&self) -> Result<Vec<PathBuf>, DeployctlError> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Like `list_files`, keeping only names ending in `.<extension>`
    pub async fn list_files_with_extension(&self, extension: &str) -> Result<Vec<File>, DeployctlError> {
        Ok(self
            .list_files()
            .await?
            .into_iter()
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(extension))
            .map(File::new)
            .collect())
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Fresh, uniquely named directory under the system temp dir
    pub async fn create_temp_dir(prefix: &str) -> Result<Dir, DeployctlError> {
        let dir = Dir::new(std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4())));
        dir.create().await?;
        Ok(dir)
    }
}

//! Storage backends for the audit log

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::audit::record::StoredDeploymentLog;
use crate::errors::DeployctlError;

/// Row storage behind `AuditLog`.
///
/// Every call reads or writes whole rows; a row is either fully written or
/// not written at all.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Insert a new row. Fails if the id is already taken.
    async fn insert(&self, row: StoredDeploymentLog) -> Result<(), DeployctlError>;

    /// Replace an existing row. Fails with `NotFound` if it does not exist.
    async fn replace(&self, row: StoredDeploymentLog) -> Result<(), DeployctlError>;

    async fn get(&self, id: &str) -> Result<Option<StoredDeploymentLog>, DeployctlError>;

    async fn list(&self) -> Result<Vec<StoredDeploymentLog>, DeployctlError>;

    /// Delete every row started strictly before `cutoff`, returning the count
    async fn delete_started_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DeployctlError>;
}

/// In-process store
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<String, StoredDeploymentLog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn insert(&self, row: StoredDeploymentLog) -> Result<(), DeployctlError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&row.id) {
            return Err(DeployctlError::StorageError(format!("duplicate id {}", row.id)));
        }
        rows.insert(row.id.clone(), row);
        Ok(())
    }

    async fn replace(&self, row: StoredDeploymentLog) -> Result<(), DeployctlError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&row.id) {
            Some(existing) => {
                *existing = row;
                Ok(())
            }
            None => Err(DeployctlError::NotFound(format!("deployment log {}", row.id))),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<StoredDeploymentLog>, DeployctlError> {
        Ok(self.rows.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<StoredDeploymentLog>, DeployctlError> {
        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn delete_started_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DeployctlError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, row| row.started_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

//! Persisted row layout of an audit entry
//!
//! Structured sub-fields are kept as JSON text and the status is stored
//! upper-cased. This module is the only place that knows about either.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::DeployctlError;
use crate::models::audit::{DeploymentLogEntry, DeploymentLogUpdate};

/// A row as written to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDeploymentLog {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub platform: String,
    pub config_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<u64>,
    pub commit_hash: Option<String>,
    pub branch: String,
    pub deployment_url: Option<String>,
    pub build_id: Option<String>,
    pub logs: String,
    pub validations: String,
    pub steps: String,
    pub error: Option<String>,
    pub metadata: String,
}

/// Canonical persisted casing of a status
pub fn status_to_stored(status: DeploymentStatus) -> String {
    status.as_str().to_uppercase()
}

pub fn status_from_stored(raw: &str) -> Result<DeploymentStatus, DeployctlError> {
    raw.parse().map_err(DeployctlError::StorageError)
}

impl StoredDeploymentLog {
    /// Serialize every structured field up front so a failure leaves
    /// nothing half-written.
    pub fn from_entry(entry: &DeploymentLogEntry) -> Result<Self, DeployctlError> {
        Ok(Self {
            id: entry.id.clone(),
            user_id: entry.user_id.clone(),
            status: status_to_stored(entry.status),
            platform: entry.platform.as_str().to_string(),
            config_id: entry.config_id.clone(),
            started_at: entry.started_at,
            completed_at: entry.completed_at,
            duration: entry.duration,
            commit_hash: entry.commit_hash.clone(),
            branch: entry.branch.clone(),
            deployment_url: entry.deployment_url.clone(),
            build_id: entry.build_id.clone(),
            logs: serde_json::to_string(&entry.logs)?,
            validations: serde_json::to_string(&entry.validations)?,
            steps: serde_json::to_string(&entry.steps)?,
            error: entry.error.as_ref().map(serde_json::to_string).transpose()?,
            metadata: serde_json::to_string(&entry.metadata)?,
        })
    }

    pub fn into_entry(self) -> Result<DeploymentLogEntry, DeployctlError> {
        Ok(DeploymentLogEntry {
            status: status_from_stored(&self.status)?,
            platform: self.platform.parse().map_err(DeployctlError::StorageError)?,
            logs: serde_json::from_str(&self.logs)?,
            validations: serde_json::from_str(&self.validations)?,
            steps: serde_json::from_str(&self.steps)?,
            error: self.error.as_deref().map(serde_json::from_str).transpose()?,
            metadata: serde_json::from_str(&self.metadata)?,
            id: self.id,
            user_id: self.user_id,
            config_id: self.config_id,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration: self.duration,
            commit_hash: self.commit_hash,
            branch: self.branch,
            deployment_url: self.deployment_url,
            build_id: self.build_id,
        })
    }
}

/// Apply a partial update to an entry, touching only present fields
pub fn apply_update(entry: &mut DeploymentLogEntry, update: DeploymentLogUpdate) {
    let DeploymentLogUpdate {
        status,
        deployment_url,
        build_id,
        logs,
        validations,
        steps,
        error,
        metadata,
        completed_at,
        duration,
    } = update;

    if let Some(status) = status {
        entry.status = status;
    }
    if let Some(url) = deployment_url {
        entry.deployment_url = url;
    }
    if let Some(build_id) = build_id {
        entry.build_id = Some(build_id);
    }
    if let Some(logs) = logs {
        entry.logs = logs;
    }
    if let Some(validations) = validations {
        entry.validations = validations;
    }
    if let Some(steps) = steps {
        entry.steps = steps;
    }
    if let Some(error) = error {
        entry.error = error;
    }
    if let Some(metadata) = metadata {
        entry.metadata = metadata;
    }
    if let Some(completed_at) = completed_at {
        entry.completed_at = Some(completed_at);
    }
    if let Some(duration) = duration {
        entry.duration = Some(duration);
    }
}

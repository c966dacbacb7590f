//! Deployment audit log

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::file_store::FileStore;
use crate::audit::record::{apply_update, StoredDeploymentLog};
use crate::audit::store::{LogStore, MemoryStore};
use crate::deploy::fsm::DeploymentStatus;
use crate::deploy::state::DeploymentState;
use crate::errors::DeployctlError;
use crate::filesys::dir::Dir;
use crate::models::audit::{
    DeploymentLogEntry, DeploymentLogUpdate, DeploymentStats, LogQuery, NewDeploymentLog,
    Pagination,
};
use crate::models::deployment::{default_branch, DeploymentConfig, Platform};
use crate::utils::generate_uuid;

/// Durable record of deployment attempts.
///
/// Writes propagate storage failures to the caller. Listing and statistics
/// reads log the failure and return empty results instead.
pub struct AuditLog {
    store: Arc<dyn LogStore>,
    // serializes read-modify-write in `update_log`
    write_lock: Mutex<()>,
    closed: AtomicBool,
}

impl AuditLog {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Audit log backed by process memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Audit log backed by a directory of JSON rows
    pub async fn open_dir(dir: Dir) -> Result<Self, DeployctlError> {
        let store = FileStore::open(dir).await?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Stop accepting operations
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Audit log closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), DeployctlError> {
        if self.is_closed() {
            return Err(DeployctlError::StorageClosed("audit log".to_string()));
        }
        Ok(())
    }

    /// Persist a new entry and return its id
    pub async fn create_log(&self, data: NewDeploymentLog) -> Result<String, DeployctlError> {
        self.ensure_open()?;

        let entry = DeploymentLogEntry {
            id: generate_uuid(),
            user_id: data.user_id,
            status: data.status,
            platform: data.platform,
            config_id: data.config_id,
            started_at: data.started_at.unwrap_or_else(Utc::now),
            completed_at: data.completed_at,
            duration: data.duration,
            commit_hash: data.commit_hash,
            branch: data.branch.unwrap_or_else(default_branch),
            deployment_url: data.deployment_url,
            build_id: data.build_id,
            steps: data.steps,
            validations: data.validations,
            logs: data.logs,
            error: data.error,
            metadata: data
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        };

        let row = StoredDeploymentLog::from_entry(&entry)?;
        self.store.insert(row).await?;

        debug!(
            "Created deployment log {} for user {} ({}, {})",
            entry.id, entry.user_id, entry.platform, entry.status
        );
        Ok(entry.id)
    }

    /// Amend an existing entry; absent fields keep their value
    pub async fn update_log(&self, id: &str, update: DeploymentLogUpdate) -> Result<(), DeployctlError> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock().await;

        let row = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| DeployctlError::NotFound(format!("deployment log {}", id)))?;
        let mut entry = row.into_entry()?;
        apply_update(&mut entry, update);

        self.store.replace(StoredDeploymentLog::from_entry(&entry)?).await?;
        debug!("Updated deployment log {} ({})", id, entry.status);
        Ok(())
    }

    pub async fn get_log_by_id(&self, id: &str) -> Result<Option<DeploymentLogEntry>, DeployctlError> {
        self.ensure_open()?;
        match self.store.get(id).await? {
            Some(row) => row.into_entry().map(Some),
            None => Ok(None),
        }
    }

    /// Filtered, paginated listing, newest first
    pub async fn query(&self, query: &LogQuery) -> Result<Vec<DeploymentLogEntry>, DeployctlError> {
        let mut entries = self.load_matching(query).await?;
        sort_newest_first(&mut entries);
        Ok(entries
            .into_iter()
            .skip(query.pagination.offset)
            .take(query.pagination.limit)
            .collect())
    }

    /// A user's entries, newest first. Empty on read failure.
    pub async fn get_user_deployment_logs(
        &self,
        user_id: &str,
        pagination: Pagination,
    ) -> Vec<DeploymentLogEntry> {
        let query = LogQuery {
            user_id: Some(user_id.to_string()),
            pagination,
            ..Default::default()
        };
        self.query(&query).await.unwrap_or_else(|e| {
            warn!("Failed to read deployment logs for user {}: {}", user_id, e);
            Vec::new()
        })
    }

    /// Every user's entries, newest first. Empty on read failure.
    pub async fn get_all_deployment_logs(
        &self,
        pagination: Pagination,
        status: Option<DeploymentStatus>,
        platform: Option<Platform>,
    ) -> Vec<DeploymentLogEntry> {
        let query = LogQuery {
            status,
            platform,
            pagination,
            ..Default::default()
        };
        self.query(&query).await.unwrap_or_else(|e| {
            warn!("Failed to read deployment logs: {}", e);
            Vec::new()
        })
    }

    /// Aggregates for one user or for everyone. Zeroed on read failure.
    pub async fn get_deployment_stats(&self, user_id: Option<&str>) -> DeploymentStats {
        let query = LogQuery {
            user_id: user_id.map(str::to_string),
            ..Default::default()
        };
        match self.load_matching(&query).await {
            Ok(entries) => DeploymentStats::from_entries(&entries),
            Err(e) => {
                warn!("Failed to compute deployment stats: {}", e);
                DeploymentStats::default()
            }
        }
    }

    /// Delete entries started more than `days_to_keep` days ago
    pub async fn cleanup_old_logs(&self, days_to_keep: u32) -> Result<u64, DeployctlError> {
        self.ensure_open()?;
        // A window reaching past the earliest representable time keeps everything
        let Some(cutoff) = Duration::try_days(i64::from(days_to_keep))
            .and_then(|window| Utc::now().checked_sub_signed(window))
        else {
            debug!("Retention window of {} days predates every entry", days_to_keep);
            return Ok(0);
        };
        let _guard = self.write_lock.lock().await;
        let deleted = self.store.delete_started_before(cutoff).await?;
        info!("Deleted {} deployment logs older than {} days", deleted, days_to_keep);
        Ok(deleted)
    }

    /// Write a finished attempt as a single record
    pub async fn record_attempt(
        &self,
        user_id: &str,
        config: &DeploymentConfig,
        state: &DeploymentState,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<String, DeployctlError> {
        let final_update = finalize_update(config, state, started_at, completed_at);
        let data = NewDeploymentLog {
            user_id: user_id.to_string(),
            status: state.status,
            platform: config.platform,
            config_id: config.config_id.clone(),
            commit_hash: config.commit_hash.clone(),
            branch: Some(config.branch.clone()),
            deployment_url: final_update.deployment_url.flatten(),
            build_id: final_update.build_id,
            logs: final_update.logs.unwrap_or_default(),
            validations: final_update.validations.unwrap_or_default(),
            steps: final_update.steps.unwrap_or_default(),
            error: final_update.error.flatten(),
            metadata: final_update.metadata,
            started_at: Some(started_at),
            completed_at: final_update.completed_at,
            duration: final_update.duration,
        };
        self.create_log(data).await
    }

    async fn load_matching(&self, query: &LogQuery) -> Result<Vec<DeploymentLogEntry>, DeployctlError> {
        self.ensure_open()?;
        let mut entries = Vec::new();
        for row in self.store.list().await? {
            let id = row.id.clone();
            match row.into_entry() {
                Ok(entry) if query.matches(&entry) => entries.push(entry),
                Ok(_) => {}
                Err(e) => warn!("Skipping malformed deployment log {}: {}", id, e),
            }
        }
        Ok(entries)
    }
}

fn sort_newest_first(entries: &mut [DeploymentLogEntry]) {
    entries.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id)));
}

/// Everything a terminal attempt contributes to its record
pub fn finalize_update(
    config: &DeploymentConfig,
    state: &DeploymentState,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
) -> DeploymentLogUpdate {
    let duration = (completed_at - started_at).num_milliseconds().max(0) as u64;

    let mut metadata = match &config.metadata {
        serde_json::Value::Object(map) => map.clone(),
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("config".to_string(), other.clone());
            map
        }
    };
    metadata.insert("attempt".to_string(), state.attempt.into());
    if let Some(url) = &state.partial_deployment_url {
        metadata.insert("partialDeploymentUrl".to_string(), url.clone().into());
    }

    DeploymentLogUpdate {
        status: Some(state.status),
        deployment_url: Some(state.deployment_url.clone()),
        build_id: state.build_id.clone(),
        logs: Some(state.logs.clone()),
        validations: Some(state.validations.clone()),
        steps: Some(state.steps.clone()),
        error: Some(state.error.clone()),
        metadata: Some(serde_json::Value::Object(metadata)),
        completed_at: Some(completed_at),
        duration: Some(duration),
    }
}

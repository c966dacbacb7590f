//! Deployment audit log models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;
use crate::deploy::state::{DeploymentError, DeploymentStep, ValidationResult};
use crate::models::deployment::Platform;

/// Default page size for listings
pub const DEFAULT_LIMIT: usize = 10;

/// Default retention window for `cleanup_old_logs`
pub const DEFAULT_DAYS_TO_KEEP: u32 = 90;

/// One recorded deployment attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentLogEntry {
    pub id: String,
    pub user_id: String,
    pub status: DeploymentStatus,
    pub platform: Platform,
    pub config_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Milliseconds
    pub duration: Option<u64>,
    pub commit_hash: Option<String>,
    pub branch: String,
    pub deployment_url: Option<String>,
    pub build_id: Option<String>,
    pub steps: Vec<DeploymentStep>,
    pub validations: Vec<ValidationResult>,
    pub logs: Vec<String>,
    pub error: Option<DeploymentError>,
    pub metadata: serde_json::Value,
}

/// Input of `create_log`
#[derive(Debug, Clone, PartialEq)]
pub struct NewDeploymentLog {
    pub user_id: String,
    pub status: DeploymentStatus,
    pub platform: Platform,
    pub config_id: Option<String>,
    pub commit_hash: Option<String>,
    pub branch: Option<String>,
    pub deployment_url: Option<String>,
    pub build_id: Option<String>,
    pub logs: Vec<String>,
    pub validations: Vec<ValidationResult>,
    pub steps: Vec<DeploymentStep>,
    pub error: Option<DeploymentError>,
    pub metadata: Option<serde_json::Value>,

    /// Real start time when the record is written after the fact
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<u64>,
}

impl NewDeploymentLog {
    pub fn new(user_id: impl Into<String>, status: DeploymentStatus, platform: Platform) -> Self {
        Self {
            user_id: user_id.into(),
            status,
            platform,
            config_id: None,
            commit_hash: None,
            branch: None,
            deployment_url: None,
            build_id: None,
            logs: Vec::new(),
            validations: Vec::new(),
            steps: Vec::new(),
            error: None,
            metadata: None,
            started_at: None,
            completed_at: None,
            duration: None,
        }
    }
}

/// Partial update of an existing entry. `None` leaves a field untouched.
///
/// The nullable fields take `Some(None)` to clear a stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentLogUpdate {
    pub status: Option<DeploymentStatus>,
    pub deployment_url: Option<Option<String>>,
    pub build_id: Option<String>,
    pub logs: Option<Vec<String>>,
    pub validations: Option<Vec<ValidationResult>>,
    pub steps: Option<Vec<DeploymentStep>>,
    pub error: Option<Option<DeploymentError>>,
    pub metadata: Option<serde_json::Value>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<u64>,
}

/// Limit/offset pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Pagination {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    /// Translate 1-based page numbering; page 0 is treated as page 1.
    pub fn from_page(page: usize, limit: usize) -> Self {
        Self {
            limit,
            offset: page.saturating_sub(1).saturating_mul(limit),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// Filters for listing entries. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogQuery {
    pub user_id: Option<String>,
    pub status: Option<DeploymentStatus>,
    pub platform: Option<Platform>,

    /// Inclusive lower bound on `started_at`
    pub started_after: Option<DateTime<Utc>>,

    /// Exclusive upper bound on `started_at`
    pub started_before: Option<DateTime<Utc>>,
    pub pagination: Pagination,
}

impl LogQuery {
    pub fn matches(&self, entry: &DeploymentLogEntry) -> bool {
        if let Some(user_id) = &self.user_id {
            if &entry.user_id != user_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(platform) = self.platform {
            if entry.platform != platform {
                return false;
            }
        }
        if let Some(after) = self.started_after {
            if entry.started_at < after {
                return false;
            }
        }
        if let Some(before) = self.started_before {
            if entry.started_at >= before {
                return false;
            }
        }
        true
    }
}

/// Aggregates over a set of entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,

    /// Mean duration in milliseconds over entries that recorded one
    pub average_duration: Option<f64>,
    pub last_deployment: Option<DateTime<Utc>>,
    pub counts_by_platform: BTreeMap<Platform, u64>,
    pub counts_by_status: BTreeMap<DeploymentStatus, u64>,
}

impl DeploymentStats {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a DeploymentLogEntry>) -> Self {
        let mut stats = DeploymentStats::default();
        let mut duration_sum: u128 = 0;
        let mut duration_count: u64 = 0;

        for entry in entries {
            stats.total += 1;
            match entry.status {
                DeploymentStatus::Success => stats.successful += 1,
                DeploymentStatus::Error => stats.failed += 1,
                _ => {}
            }
            if let Some(duration) = entry.duration {
                duration_sum += u128::from(duration);
                duration_count += 1;
            }
            if stats.last_deployment.map_or(true, |last| entry.started_at > last) {
                stats.last_deployment = Some(entry.started_at);
            }
            *stats.counts_by_platform.entry(entry.platform).or_default() += 1;
            *stats.counts_by_status.entry(entry.status).or_default() += 1;
        }

        if duration_count > 0 {
            stats.average_duration = Some(duration_sum as f64 / duration_count as f64);
        }

        stats
    }
}

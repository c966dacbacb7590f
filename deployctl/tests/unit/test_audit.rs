//! Audit log tests

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio_test::{assert_err, assert_ok};

use deployctl::audit::record::StoredDeploymentLog;
use deployctl::audit::store::LogStore;
use deployctl::audit::AuditLog;
use deployctl::deploy::fsm::DeploymentStatus;
use deployctl::deploy::state::{
    codes, DeploymentError, DeploymentState, DeploymentStep, Stage, StepStatus, ValidationResult,
};
use deployctl::errors::DeployctlError;
use deployctl::filesys::dir::Dir;
use deployctl::models::audit::{DeploymentLogUpdate, LogQuery, NewDeploymentLog, Pagination};
use deployctl::models::deployment::{DeploymentConfig, Platform};

fn new_log(user_id: &str, status: DeploymentStatus, platform: Platform) -> NewDeploymentLog {
    NewDeploymentLog::new(user_id, status, platform)
}

fn started(user_id: &str, platform: Platform, started_at: DateTime<Utc>) -> NewDeploymentLog {
    let mut data = new_log(user_id, DeploymentStatus::Success, platform);
    data.started_at = Some(started_at);
    data
}

fn full_log() -> NewDeploymentLog {
    let mut data = new_log("u1", DeploymentStatus::Error, Platform::Netlify);
    data.config_id = Some("cfg-prod".to_string());
    data.commit_hash = Some("9f2c1ab".to_string());
    data.branch = Some("release/2.1".to_string());
    data.build_id = Some("build-42".to_string());
    data.logs = vec![
        "[10:00:00] Starting deployment".to_string(),
        "[10:00:03] ✗ tests: 2 failing".to_string(),
    ];
    data.validations = vec![
        ValidationResult::pass("branch", "Branch 'release/2.1' is valid"),
        ValidationResult::fail("environment", "STRIPE_KEY missing"),
    ];
    data.steps = vec![
        DeploymentStep {
            name: Stage::Build.as_str().to_string(),
            status: StepStatus::Completed,
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
        },
        DeploymentStep::pending(Stage::Deploy),
    ];
    data.error = Some(DeploymentError {
        code: "TEST_FAILED".to_string(),
        message: "2 tests failed".to_string(),
        stack: Some("at checkout.spec.ts:12".to_string()),
        step: Some("test".to_string()),
    });
    data.metadata = Some(serde_json::json!({
        "trigger": "manual",
        "nested": { "list": [1, 2, 3], "flag": true, "none": null }
    }));
    data
}

async fn file_backed() -> (AuditLog, Dir) {
    let dir = Dir::create_temp_dir("deployctl-audit").await.unwrap();
    let audit = AuditLog::open_dir(dir.clone()).await.unwrap();
    (audit, dir)
}

#[tokio::test]
async fn test_round_trip_structured_fields() {
    let audit = AuditLog::in_memory();
    let data = full_log();

    let id = audit.create_log(data.clone()).await.unwrap();
    let entry = audit.get_log_by_id(&id).await.unwrap().unwrap();

    assert_eq!(entry.id, id);
    assert_eq!(entry.logs, data.logs);
    assert_eq!(entry.validations, data.validations);
    assert_eq!(entry.steps, data.steps);
    assert_eq!(entry.error, data.error);
    assert_eq!(Some(entry.metadata), data.metadata);
    assert_eq!(entry.branch, "release/2.1");
    assert_eq!(entry.commit_hash.as_deref(), Some("9f2c1ab"));
}

#[tokio::test]
async fn test_round_trip_through_files() {
    let (audit, dir) = file_backed().await;
    let data = full_log();

    let id = audit.create_log(data.clone()).await.unwrap();

    // A fresh handle over the same directory sees the same record
    let reopened = AuditLog::open_dir(dir.clone()).await.unwrap();
    let entry = reopened.get_log_by_id(&id).await.unwrap().unwrap();
    assert_eq!(entry.validations, data.validations);
    assert_eq!(entry.steps, data.steps);
    assert_eq!(entry.error, data.error);
    assert_eq!(Some(entry.metadata), data.metadata);

    // Status is persisted upper-cased
    let raw: StoredDeploymentLog = dir.file(&format!("{}.json", id)).read_json().await.unwrap();
    assert_eq!(raw.status, "ERROR");

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_create_then_update_scenario() {
    let audit = AuditLog::in_memory();
    let id = audit
        .create_log(new_log("u1", DeploymentStatus::Deploying, Platform::Vercel))
        .await
        .unwrap();

    let completed_at = Utc::now();
    audit
        .update_log(
            &id,
            DeploymentLogUpdate {
                status: Some(DeploymentStatus::Success),
                deployment_url: Some(Some("https://x.app".to_string())),
                completed_at: Some(completed_at),
                duration: Some(2500),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let entry = audit.get_log_by_id(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, DeploymentStatus::Success);
    assert_eq!(entry.deployment_url.as_deref(), Some("https://x.app"));
    assert_eq!(entry.duration, Some(2500));
    assert_eq!(entry.completed_at, Some(completed_at));
    assert_eq!(entry.branch, "main");
    assert_eq!(entry.user_id, "u1");
    assert_eq!(entry.platform, Platform::Vercel);
}

#[tokio::test]
async fn test_record_finished_attempt_in_one_write() {
    let audit = AuditLog::in_memory();
    let config = DeploymentConfig::new(Platform::Render)
        .with_branch("hotfix/login")
        .with_config_id("cfg-eu")
        .with_commit_hash("77ab10e");

    let mut state = DeploymentState::started(4);
    for stage in [Stage::Validate, Stage::Build, Stage::Test, Stage::Deploy] {
        state.mark_step(stage, StepStatus::Completed);
    }
    state.mark_step(Stage::Verify, StepStatus::Failed);
    state.status = DeploymentStatus::Error;
    state.progress = 92;
    state.validations = vec![ValidationResult::pass("branch", "Branch 'hotfix/login' is valid")];
    state.push_log("Verifying deployment");
    state.build_id = Some("build-77ab10e0".to_string());
    state.partial_deployment_url = Some("https://77ab10e0.onrender.com".to_string());
    state.error = Some(DeploymentError::new(codes::VERIFY_FAILED, "health check returned 502").at_stage(Stage::Verify));

    let started_at = Utc::now() - Duration::seconds(42);
    let completed_at = Utc::now();
    let id = audit
        .record_attempt("u7", &config, &state, started_at, completed_at)
        .await
        .unwrap();

    let entry = audit.get_log_by_id(&id).await.unwrap().unwrap();
    assert_eq!(entry.user_id, "u7");
    assert_eq!(entry.status, DeploymentStatus::Error);
    assert_eq!(entry.platform, Platform::Render);
    assert_eq!(entry.branch, "hotfix/login");
    assert_eq!(entry.config_id.as_deref(), Some("cfg-eu"));
    assert_eq!(entry.commit_hash.as_deref(), Some("77ab10e"));
    assert_eq!(entry.started_at, started_at);
    assert_eq!(entry.completed_at, Some(completed_at));
    assert_eq!(entry.duration, Some((completed_at - started_at).num_milliseconds() as u64));
    assert!(entry.deployment_url.is_none());
    assert_eq!(entry.build_id, state.build_id);
    assert_eq!(entry.error, state.error);
    assert_eq!(entry.steps, state.steps);
    assert_eq!(entry.validations, state.validations);
    assert_eq!(entry.logs, state.logs);
    assert_eq!(entry.metadata["partialDeploymentUrl"], "https://77ab10e0.onrender.com");
    assert_eq!(entry.metadata["attempt"], 4);
}

#[tokio::test]
async fn test_update_can_clear_url_and_error() {
    let audit = AuditLog::in_memory();
    let mut data = full_log();
    data.deployment_url = Some("https://old.netlify.app".to_string());
    let id = audit.create_log(data).await.unwrap();

    audit
        .update_log(
            &id,
            DeploymentLogUpdate {
                deployment_url: Some(None),
                error: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let entry = audit.get_log_by_id(&id).await.unwrap().unwrap();
    assert!(entry.deployment_url.is_none());
    assert!(entry.error.is_none());
    assert_eq!(entry.build_id.as_deref(), Some("build-42"));
}

#[tokio::test]
async fn test_cleanup_with_window_beyond_calendar() {
    let (audit, dir) = file_backed().await;
    audit
        .create_log(started("u1", Platform::Heroku, Utc::now() - Duration::days(400)))
        .await
        .unwrap();

    assert_eq!(assert_ok!(audit.cleanup_old_logs(u32::MAX).await), 0);
    assert_eq!(audit.get_deployment_stats(Some("u1")).await.total, 1);

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_update_only_touches_present_fields() {
    let audit = AuditLog::in_memory();
    let data = full_log();
    let id = audit.create_log(data.clone()).await.unwrap();

    audit
        .update_log(
            &id,
            DeploymentLogUpdate {
                logs: Some(vec!["[10:01:00] Retried".to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let entry = audit.get_log_by_id(&id).await.unwrap().unwrap();
    assert_eq!(entry.logs, vec!["[10:01:00] Retried".to_string()]);
    assert_eq!(entry.validations, data.validations);
    assert_eq!(entry.error, data.error);
    assert_eq!(entry.build_id.as_deref(), Some("build-42"));
    assert_eq!(entry.status, DeploymentStatus::Error);
}

#[tokio::test]
async fn test_update_missing_id_fails() {
    let audit = AuditLog::in_memory();
    let result = audit
        .update_log("does-not-exist", DeploymentLogUpdate::default())
        .await;
    assert!(matches!(result, Err(DeployctlError::NotFound(_))));

    let (file_audit, dir) = file_backed().await;
    let result = file_audit
        .update_log("does-not-exist", DeploymentLogUpdate::default())
        .await;
    assert!(matches!(result, Err(DeployctlError::NotFound(_))));
    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_user_logs_limit_and_order() {
    let audit = AuditLog::in_memory();
    let now = Utc::now();
    for minutes in [30, 5, 50, 10, 40, 20] {
        audit
            .create_log(started("u1", Platform::Vercel, now - Duration::minutes(minutes)))
            .await
            .unwrap();
    }
    audit
        .create_log(started("u2", Platform::Vercel, now))
        .await
        .unwrap();

    let page = audit.get_user_deployment_logs("u1", Pagination::new(4, 0)).await;
    assert_eq!(page.len(), 4);
    assert!(page.iter().all(|e| e.user_id == "u1"));
    assert!(page.windows(2).all(|w| w[0].started_at > w[1].started_at));
    assert_eq!(page[0].started_at, now - Duration::minutes(5));

    let rest = audit.get_user_deployment_logs("u1", Pagination::new(4, 4)).await;
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[1].started_at, now - Duration::minutes(50));

    // Page numbering maps onto the same offsets
    let page_two = audit.get_user_deployment_logs("u1", Pagination::from_page(2, 4)).await;
    assert_eq!(page_two, rest);

    assert!(audit.get_user_deployment_logs("nobody", Pagination::default()).await.is_empty());
}

#[tokio::test]
async fn test_all_logs_filters() {
    let audit = AuditLog::in_memory();
    audit.create_log(new_log("u1", DeploymentStatus::Success, Platform::Vercel)).await.unwrap();
    audit.create_log(new_log("u2", DeploymentStatus::Error, Platform::Vercel)).await.unwrap();
    audit.create_log(new_log("u3", DeploymentStatus::Success, Platform::Render)).await.unwrap();

    let all = audit.get_all_deployment_logs(Pagination::default(), None, None).await;
    assert_eq!(all.len(), 3);

    let successes = audit
        .get_all_deployment_logs(Pagination::default(), Some(DeploymentStatus::Success), None)
        .await;
    assert_eq!(successes.len(), 2);

    let vercel_errors = audit
        .get_all_deployment_logs(
            Pagination::default(),
            Some(DeploymentStatus::Error),
            Some(Platform::Vercel),
        )
        .await;
    assert_eq!(vercel_errors.len(), 1);
    assert_eq!(vercel_errors[0].user_id, "u2");
}

#[tokio::test]
async fn test_query_by_date_range() {
    let audit = AuditLog::in_memory();
    let now = Utc::now();
    for days in [1, 3, 8] {
        audit
            .create_log(started("u1", Platform::Heroku, now - Duration::days(days)))
            .await
            .unwrap();
    }

    let query = LogQuery {
        started_after: Some(now - Duration::days(7)),
        started_before: Some(now - Duration::days(2)),
        ..Default::default()
    };
    let entries = assert_ok!(audit.query(&query).await);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].started_at, now - Duration::days(3));
}

#[tokio::test]
async fn test_stats_average_excludes_missing_durations() {
    let audit = AuditLog::in_memory();
    for (status, platform, duration) in [
        (DeploymentStatus::Success, Platform::Vercel, Some(1000)),
        (DeploymentStatus::Success, Platform::Vercel, Some(2000)),
        (DeploymentStatus::Error, Platform::Render, Some(6000)),
        (DeploymentStatus::Deploying, Platform::Render, None),
        (DeploymentStatus::Error, Platform::Docker, None),
    ] {
        let mut data = new_log("u1", status, platform);
        data.duration = duration;
        audit.create_log(data).await.unwrap();
    }
    audit
        .create_log(new_log("u2", DeploymentStatus::Success, Platform::Aws))
        .await
        .unwrap();

    let stats = audit.get_deployment_stats(Some("u1")).await;
    assert_eq!(stats.total, 5);
    assert_eq!(stats.successful, 2);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.average_duration, Some(3000.0));
    assert_eq!(stats.counts_by_platform.get(&Platform::Render), Some(&2));
    assert_eq!(stats.counts_by_status.get(&DeploymentStatus::Deploying), Some(&1));
    assert!(stats.last_deployment.is_some());

    let everyone = audit.get_deployment_stats(None).await;
    assert_eq!(everyone.total, 6);

    let nobody = audit.get_deployment_stats(Some("nobody")).await;
    assert_eq!(nobody.total, 0);
    assert_eq!(nobody.average_duration, None);
}

#[tokio::test]
async fn test_cleanup_old_logs() {
    let audit = AuditLog::in_memory();
    let now = Utc::now();
    let old = audit
        .create_log(started("u1", Platform::Vercel, now - Duration::days(91)))
        .await
        .unwrap();
    let recent = audit
        .create_log(started("u1", Platform::Vercel, now - Duration::days(10)))
        .await
        .unwrap();

    let deleted = audit.cleanup_old_logs(90).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(audit.get_log_by_id(&old).await.unwrap().is_none());
    assert!(audit.get_log_by_id(&recent).await.unwrap().is_some());
}

#[tokio::test]
async fn test_cleanup_old_logs_on_disk() {
    let (audit, dir) = file_backed().await;
    let now = Utc::now();
    audit
        .create_log(started("u1", Platform::Railway, now - Duration::days(91)))
        .await
        .unwrap();
    let recent = audit
        .create_log(started("u1", Platform::Railway, now - Duration::days(10)))
        .await
        .unwrap();

    assert_eq!(audit.cleanup_old_logs(90).await.unwrap(), 1);
    assert_eq!(dir.list_files().await.unwrap().len(), 1);
    assert!(audit.get_log_by_id(&recent).await.unwrap().is_some());

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_creates_get_distinct_ids() {
    let (audit, dir) = file_backed().await;
    let audit = Arc::new(audit);

    let a = {
        let audit = audit.clone();
        tokio::spawn(async move {
            audit
                .create_log(new_log("u1", DeploymentStatus::Validating, Platform::Vercel))
                .await
        })
    };
    let b = {
        let audit = audit.clone();
        tokio::spawn(async move {
            audit
                .create_log(new_log("u2", DeploymentStatus::Validating, Platform::Netlify))
                .await
        })
    };

    let id_a = a.await.unwrap().unwrap();
    let id_b = b.await.unwrap().unwrap();
    assert_ne!(id_a, id_b);

    assert_eq!(audit.get_log_by_id(&id_a).await.unwrap().unwrap().user_id, "u1");
    assert_eq!(audit.get_log_by_id(&id_b).await.unwrap().unwrap().user_id, "u2");

    dir.delete().await.unwrap();
}

/// Store whose every operation fails, standing in for unavailable storage
struct UnavailableStore;

#[async_trait]
impl LogStore for UnavailableStore {
    async fn insert(&self, _row: StoredDeploymentLog) -> Result<(), DeployctlError> {
        Err(DeployctlError::StorageError("connection refused".to_string()))
    }

    async fn replace(&self, _row: StoredDeploymentLog) -> Result<(), DeployctlError> {
        Err(DeployctlError::StorageError("connection refused".to_string()))
    }

    async fn get(&self, _id: &str) -> Result<Option<StoredDeploymentLog>, DeployctlError> {
        Err(DeployctlError::StorageError("connection refused".to_string()))
    }

    async fn list(&self) -> Result<Vec<StoredDeploymentLog>, DeployctlError> {
        Err(DeployctlError::StorageError("connection refused".to_string()))
    }

    async fn delete_started_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, DeployctlError> {
        Err(DeployctlError::StorageError("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_writes_propagate_and_listings_degrade() {
    let audit = AuditLog::new(Arc::new(UnavailableStore));

    assert_err!(audit.create_log(new_log("u1", DeploymentStatus::Idle, Platform::Aws)).await);
    assert_err!(audit.update_log("x", DeploymentLogUpdate::default()).await);
    assert_err!(audit.get_log_by_id("x").await);
    assert_err!(audit.cleanup_old_logs(90).await);

    assert!(audit.get_user_deployment_logs("u1", Pagination::default()).await.is_empty());
    assert!(audit
        .get_all_deployment_logs(Pagination::default(), None, None)
        .await
        .is_empty());
    assert_eq!(audit.get_deployment_stats(None).await.total, 0);
}

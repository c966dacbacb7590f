//! Deployment orchestrator
//!
//! Owns one attempt at a time and drives it through
//! `validating -> building -> testing -> deploying -> success | error` on a
//! background task. Callers observe snapshots through a watch channel and
//! receive the terminal outcome exactly once through a [`DeploymentHandle`].
//!
//! Only the background task of an attempt moves it between statuses. Other
//! callers can request cancellation, which the task observes at every stage
//! boundary and while a stage is in flight.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::audit::log::{finalize_update, AuditLog};
use crate::deploy::fsm::{DeploymentEvent, DeploymentStatus, FsmSettings};
use crate::deploy::state::{codes, DeploymentError, DeploymentState, Stage, StepStatus};
use crate::deploy::target::DeployTarget;
use crate::errors::DeployctlError;
use crate::models::audit::NewDeploymentLog;
use crate::models::deployment::DeploymentConfig;

/// Terminal result of an attempt
#[derive(Debug, Clone)]
pub struct DeploymentOutcome {
    /// Final snapshot, `success` or `error`
    pub state: DeploymentState,

    /// Audit entry of the attempt, when the orchestrator records one
    pub log_id: Option<String>,

    /// Set when the final audit update could not be written
    pub audit_error: Option<String>,
}

impl DeploymentOutcome {
    /// `Ok(url)` on success, the structured error otherwise
    pub fn result(&self) -> Result<&str, &DeploymentError> {
        match &self.state.error {
            Some(error) => Err(error),
            None => Ok(self.state.deployment_url.as_deref().unwrap_or_default()),
        }
    }
}

/// Returned by [`Orchestrator::deploy`]
#[derive(Debug)]
pub struct DeploymentHandle {
    attempt: u64,
    log_id: Option<String>,
    outcome: oneshot::Receiver<DeploymentOutcome>,
}

impl DeploymentHandle {
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn log_id(&self) -> Option<&str> {
        self.log_id.as_deref()
    }

    /// Wait for the terminal outcome
    pub async fn wait(self) -> Result<DeploymentOutcome, DeployctlError> {
        self.outcome.await.map_err(|_| {
            DeployctlError::Internal(format!(
                "deployment attempt {} ended without reporting an outcome",
                self.attempt
            ))
        })
    }
}

#[derive(Clone)]
struct AuditBinding {
    audit: Arc<AuditLog>,
    user_id: String,
}

/// Deployment orchestrator
pub struct Orchestrator {
    target: Arc<dyn DeployTarget>,
    settings: FsmSettings,
    audit: Option<AuditBinding>,
    state: Arc<watch::Sender<DeploymentState>>,
}

impl Orchestrator {
    pub fn new(target: Arc<dyn DeployTarget>, settings: FsmSettings) -> Self {
        let (state, _) = watch::channel(DeploymentState::default());
        Self {
            target,
            settings,
            audit: None,
            state: Arc::new(state),
        }
    }

    /// Record every attempt in `audit` on behalf of `user_id`
    pub fn with_audit(mut self, audit: Arc<AuditLog>, user_id: impl Into<String>) -> Self {
        self.audit = Some(AuditBinding {
            audit,
            user_id: user_id.into(),
        });
        self
    }

    /// Current snapshot
    pub fn state(&self) -> DeploymentState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> DeploymentStatus {
        self.state.borrow().status
    }

    /// Receive every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<DeploymentState> {
        self.state.subscribe()
    }

    pub fn is_deploying(&self) -> bool {
        self.state.borrow().is_deploying()
    }

    pub fn can_deploy(&self) -> bool {
        self.state.borrow().can_deploy()
    }

    pub fn has_error(&self) -> bool {
        self.state.borrow().has_error()
    }

    pub fn is_success(&self) -> bool {
        self.state.borrow().is_success()
    }

    /// Start a new attempt.
    ///
    /// Rejected with `AlreadyDeploying` while another attempt is in flight.
    /// Starting from a finished attempt discards its state.
    pub async fn deploy(&self, config: DeploymentConfig) -> Result<DeploymentHandle, DeployctlError> {
        let mut started = None;
        self.state.send_if_modified(|s| {
            let Ok(next) = s.status.apply(&DeploymentEvent::Start) else {
                return false;
            };
            let number = s.attempt + 1;
            *s = DeploymentState::started(number);
            s.status = next;
            s.push_log(&format!(
                "Starting deployment to {} from branch {}",
                config.platform, config.branch
            ));
            started = Some(number);
            true
        });

        let Some(number) = started else {
            return Err(DeployctlError::AlreadyDeploying(self.state.borrow().attempt));
        };
        let started_at = Utc::now();
        info!(
            "Deployment attempt {} started: platform={} branch={}",
            number, config.platform, config.branch
        );

        let log_id = match &self.audit {
            Some(binding) => match create_audit_entry(binding, &config, started_at).await {
                Ok(id) => Some(id),
                Err(e) => {
                    error!("Failed to create audit entry for attempt {}: {}", number, e);
                    let error = DeploymentError::new(
                        codes::AUDIT_WRITE_FAILED,
                        format!("Could not record deployment: {}", e),
                    );
                    end_attempt(&self.state, number, DeploymentEvent::Fail, error, "Deployment aborted");
                    return Err(e);
                }
            },
            None => None,
        };

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let attempt = Attempt {
            number,
            config,
            state: self.state.clone(),
            target: self.target.clone(),
            settings: self.settings.clone(),
            audit: self.audit.clone(),
            log_id: log_id.clone(),
            started_at,
        };
        tokio::spawn(attempt.run(self.state.subscribe(), outcome_tx));

        Ok(DeploymentHandle {
            attempt: number,
            log_id,
            outcome: outcome_rx,
        })
    }

    /// Ask the running attempt to stop.
    ///
    /// Returns `false` and leaves the state untouched when nothing is in
    /// flight or cancellation was already requested.
    pub fn cancel_deployment(&self) -> bool {
        let requested = self.state.send_if_modified(|s| {
            if !s.is_deploying() || s.cancel_requested {
                return false;
            }
            s.cancel_requested = true;
            s.push_log("Cancellation requested");
            true
        });
        if requested {
            info!("Cancellation requested for attempt {}", self.state.borrow().attempt);
        }
        requested
    }

    /// Return a finished attempt to `idle`.
    ///
    /// A no-op when already idle; rejected while an attempt is in flight.
    pub fn reset(&self) -> Result<(), DeployctlError> {
        let mut result = Ok(());
        self.state.send_if_modified(|s| match s.status.apply(&DeploymentEvent::Reset) {
            Ok(_) => {
                *s = DeploymentState::idle(s.attempt);
                true
            }
            Err(_) if s.status == DeploymentStatus::Idle => false,
            Err(e) => {
                result = Err(DeployctlError::InvalidTransition(e));
                false
            }
        });
        result
    }
}

impl Orchestrator {
    /// Feed every new log line of the current attempt to `on_line` until it
    /// ends. The first time `interrupt` resolves the attempt is cancelled.
    /// Returns how many lines were delivered.
    pub async fn follow<I>(&self, interrupt: I, mut on_line: impl FnMut(u8, &str)) -> usize
    where
        I: Future<Output = ()>,
    {
        let mut updates = self.subscribe();
        tokio::pin!(interrupt);
        let mut interrupted = false;
        let mut delivered = 0;
        loop {
            {
                let state = updates.borrow_and_update();
                for line in state.logs.iter().skip(delivered) {
                    on_line(state.progress, line);
                }
                delivered = state.logs.len();
                if !state.is_deploying() {
                    break;
                }
            }
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = &mut interrupt, if !interrupted => {
                    interrupted = true;
                    self.cancel_deployment();
                }
            }
        }
        delivered
    }
}

async fn create_audit_entry(
    binding: &AuditBinding,
    config: &DeploymentConfig,
    started_at: DateTime<Utc>,
) -> Result<String, DeployctlError> {
    let mut data = NewDeploymentLog::new(&binding.user_id, DeploymentStatus::Validating, config.platform);
    data.config_id = config.config_id.clone();
    data.commit_hash = config.commit_hash.clone();
    data.branch = Some(config.branch.clone());
    data.metadata = Some(config.metadata.clone());
    data.started_at = Some(started_at);
    binding.audit.create_log(data).await
}

/// Move attempt `number` to its terminal status and return the snapshot
fn end_attempt(
    state: &watch::Sender<DeploymentState>,
    number: u64,
    event: DeploymentEvent,
    error: DeploymentError,
    message: &str,
) -> DeploymentState {
    let mut snapshot = None;
    state.send_if_modified(|s| {
        if s.attempt != number {
            return false;
        }
        match s.status.apply(&event) {
            Ok(next) => s.status = next,
            Err(e) => {
                warn!("Attempt {} already ended: {}", number, e);
                snapshot = Some(s.clone());
                return false;
            }
        }
        s.close_open_steps();
        s.push_log(&format!("{}: {}", message, error.message));
        s.error = Some(error);
        s.deployment_url = None;
        snapshot = Some(s.clone());
        true
    });
    snapshot.unwrap_or_else(|| state.borrow().clone())
}

/// Why an attempt stopped before reaching `success`
enum StageExit {
    Failed(DeploymentError),
    Cancelled,
}

/// Background task of one attempt
struct Attempt {
    number: u64,
    config: DeploymentConfig,
    state: Arc<watch::Sender<DeploymentState>>,
    target: Arc<dyn DeployTarget>,
    settings: FsmSettings,
    audit: Option<AuditBinding>,
    log_id: Option<String>,
    started_at: DateTime<Utc>,
}

impl Attempt {
    /// Supervise the stages on their own task so a panicking target still
    /// ends the attempt and reports an outcome.
    async fn run(
        self,
        cancel_rx: watch::Receiver<DeploymentState>,
        outcome_tx: oneshot::Sender<DeploymentOutcome>,
    ) {
        let attempt = Arc::new(self);
        let worker = {
            let attempt = attempt.clone();
            let mut cancel_rx = cancel_rx;
            tokio::spawn(async move { attempt.execute(&mut cancel_rx).await })
        };

        let number = attempt.number;
        let state = match worker.await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(StageExit::Failed(error))) => {
                warn!("Deployment attempt {} failed: {}", number, error);
                end_attempt(&attempt.state, number, DeploymentEvent::Fail, error, "Deployment failed")
            }
            Ok(Err(StageExit::Cancelled)) => {
                info!("Deployment attempt {} cancelled", number);
                let error = DeploymentError::new(codes::DEPLOYMENT_CANCELLED, "Deployment cancelled by user");
                end_attempt(&attempt.state, number, DeploymentEvent::Cancel, error, "Deployment cancelled")
            }
            Err(join_error) => {
                let reason = abort_reason(join_error);
                error!("Deployment attempt {} aborted: {}", number, reason);
                let mut error = DeploymentError::new(codes::INTERNAL_ERROR, format!("Deployment task aborted: {}", reason));
                if let Some(stage) = attempt.running_stage() {
                    error = error.at_stage(stage);
                }
                end_attempt(&attempt.state, number, DeploymentEvent::Fail, error, "Deployment failed")
            }
        };

        let audit_error = attempt.persist(&state).await;
        let outcome = DeploymentOutcome {
            state,
            log_id: attempt.log_id.clone(),
            audit_error,
        };
        if outcome_tx.send(outcome).is_err() {
            debug!("Outcome of attempt {} was not awaited", number);
        }
    }

    /// Stage whose step is still running in the published snapshot
    fn running_stage(&self) -> Option<Stage> {
        let state = self.state.borrow();
        if state.attempt != self.number {
            return None;
        }
        let step = state.steps.iter().find(|s| s.status == StepStatus::Running)?;
        Stage::ALL.into_iter().find(|stage| stage.as_str() == step.name)
    }

    async fn execute(
        &self,
        cancel_rx: &mut watch::Receiver<DeploymentState>,
    ) -> Result<DeploymentState, StageExit> {
        // Validate
        self.begin(Stage::Validate, None, "Running pre-deployment validations")?;
        let validations = self
            .run_stage(cancel_rx, Stage::Validate, async {
                Ok::<_, anyhow::Error>(self.target.validate(&self.config).await)
            })
            .await?;
        let failed: Vec<String> = validations
            .iter()
            .filter(|v| !v.passed)
            .map(|v| v.name.clone())
            .collect();
        self.update(|s| {
            for v in &validations {
                let mark = if v.passed { "✓" } else { "✗" };
                s.push_log(&format!("{} {}: {}", mark, v.name, v.message));
            }
            s.validations = validations.clone();
        })?;
        if !failed.is_empty() {
            if self.settings.abort_on_failed_validation {
                return Err(StageExit::Failed(
                    DeploymentError::new(
                        codes::VALIDATION_FAILED,
                        format!("Validation failed: {}", failed.join(", ")),
                    )
                    .at_stage(Stage::Validate),
                ));
            }
            self.update(|s| {
                s.push_log(&format!("Continuing despite {} failed validation(s)", failed.len()))
            })?;
        }
        self.complete(Stage::Validate)?;

        // Build
        self.begin(Stage::Build, Some(DeploymentEvent::Advance), &format!("Building branch {}", self.config.branch))?;
        let build = self
            .run_stage(cancel_rx, Stage::Build, self.target.build(&self.config))
            .await?;
        self.update(|s| {
            s.build_id = Some(build.build_id.clone());
            s.push_log(&format!("Build {} completed", build.build_id));
        })?;
        self.complete(Stage::Build)?;

        // Test
        self.begin(Stage::Test, Some(DeploymentEvent::Advance), "Running tests")?;
        self.run_stage(cancel_rx, Stage::Test, self.target.test(&self.config, &build))
            .await?;
        self.update(|s| s.push_log("All tests passed"))?;
        self.complete(Stage::Test)?;

        // Deploy
        self.begin(
            Stage::Deploy,
            Some(DeploymentEvent::Advance),
            &format!("Deploying to {}", self.config.platform),
        )?;
        let url = self
            .run_stage(cancel_rx, Stage::Deploy, self.target.deploy(&self.config, &build))
            .await?;
        self.update(|s| {
            s.partial_deployment_url = Some(url.clone());
            s.push_log(&format!("Deployed to {}", url));
        })?;
        self.complete(Stage::Deploy)?;

        // Verify
        self.begin(Stage::Verify, None, "Verifying deployment")?;
        self.run_stage(cancel_rx, Stage::Verify, self.target.verify(&self.config, &url))
            .await?;

        let mut snapshot = None;
        self.transition(Some(DeploymentEvent::Succeed), |s| {
            s.mark_step(Stage::Verify, StepStatus::Completed);
            s.deployment_url = s.partial_deployment_url.take();
            s.error = None;
            s.progress = 100;
            s.push_log(&format!("Deployment successful: {}", url));
            snapshot = Some(s.clone());
        })?;
        info!("Deployment attempt {} succeeded: {}", self.number, url);
        snapshot.ok_or(StageExit::Cancelled)
    }

    /// Run one stage, bounded by the stage timeout and abandoned as soon
    /// as cancellation is requested.
    async fn run_stage<T>(
        &self,
        cancel_rx: &mut watch::Receiver<DeploymentState>,
        stage: Stage,
        work: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, StageExit> {
        let timeout = self.settings.stage_timeout;
        tokio::select! {
            biased;
            _ = cancellation_requested(cancel_rx) => Err(StageExit::Cancelled),
            result = tokio::time::timeout(timeout, work) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(StageExit::Failed(DeploymentError::from_stage_failure(stage, &e))),
                Err(_) => Err(StageExit::Failed(
                    DeploymentError::new(
                        codes::STAGE_TIMEOUT,
                        format!("{} stage timed out after {}s", stage.as_str(), timeout.as_secs_f64()),
                    )
                    .at_stage(stage),
                )),
            },
        }
    }

    fn begin(&self, stage: Stage, event: Option<DeploymentEvent>, message: &str) -> Result<(), StageExit> {
        debug!("Attempt {}: starting {} stage", self.number, stage.as_str());
        self.transition(event, |s| {
            s.mark_step(stage, StepStatus::Running);
            s.raise_progress(stage.progress_window().0);
            s.push_log(message);
        })
    }

    fn complete(&self, stage: Stage) -> Result<(), StageExit> {
        self.update(|s| {
            s.mark_step(stage, StepStatus::Completed);
            s.raise_progress(stage.progress_window().1);
        })
    }

    fn update(&self, f: impl FnOnce(&mut DeploymentState)) -> Result<(), StageExit> {
        self.transition(None, f)
    }

    /// Apply `f` (and `event`, if any) unless cancellation was requested
    fn transition(
        &self,
        event: Option<DeploymentEvent>,
        f: impl FnOnce(&mut DeploymentState),
    ) -> Result<(), StageExit> {
        let mut exit = None;
        self.state.send_if_modified(|s| {
            if s.attempt != self.number || s.cancel_requested {
                exit = Some(StageExit::Cancelled);
                return false;
            }
            if let Some(event) = event {
                match s.status.apply(&event) {
                    Ok(next) => s.status = next,
                    Err(e) => {
                        exit = Some(StageExit::Failed(DeploymentError::new(
                            "INVALID_TRANSITION",
                            format!("Invalid transition: {}", e),
                        )));
                        return false;
                    }
                }
            }
            f(s);
            true
        });
        match exit {
            Some(exit) => Err(exit),
            None => Ok(()),
        }
    }

    /// Write the final audit update; the error text is returned, not raised
    async fn persist(&self, state: &DeploymentState) -> Option<String> {
        let (binding, log_id) = match (&self.audit, &self.log_id) {
            (Some(binding), Some(log_id)) => (binding, log_id),
            _ => return None,
        };
        let update = finalize_update(&self.config, state, self.started_at, Utc::now());
        match binding.audit.update_log(log_id, update).await {
            Ok(()) => None,
            Err(e) => {
                error!("Failed to finalize audit entry {}: {}", log_id, e);
                Some(e.to_string())
            }
        }
    }
}

fn abort_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

async fn cancellation_requested(rx: &mut watch::Receiver<DeploymentState>) {
    let _ = rx.wait_for(|s| s.cancel_requested).await;
}

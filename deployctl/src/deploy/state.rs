//! In-memory state of one deployment attempt

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;

/// Error codes attached to failed attempts
pub mod codes {
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const BUILD_FAILED: &str = "BUILD_FAILED";
    pub const TEST_FAILED: &str = "TEST_FAILED";
    pub const DEPLOY_FAILED: &str = "DEPLOY_FAILED";
    pub const VERIFY_FAILED: &str = "VERIFY_FAILED";
    pub const STAGE_TIMEOUT: &str = "STAGE_TIMEOUT";
    pub const DEPLOYMENT_CANCELLED: &str = "DEPLOYMENT_CANCELLED";
    pub const AUDIT_WRITE_FAILED: &str = "AUDIT_WRITE_FAILED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// The stages of a deployment, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Validate,
    Build,
    Test,
    Deploy,
    Verify,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Validate,
        Stage::Build,
        Stage::Test,
        Stage::Deploy,
        Stage::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Build => "build",
            Stage::Test => "test",
            Stage::Deploy => "deploy",
            Stage::Verify => "verify",
        }
    }

    /// Error code used when this stage fails
    pub fn failure_code(&self) -> &'static str {
        match self {
            Stage::Validate => codes::VALIDATION_FAILED,
            Stage::Build => codes::BUILD_FAILED,
            Stage::Test => codes::TEST_FAILED,
            Stage::Deploy => codes::DEPLOY_FAILED,
            Stage::Verify => codes::VERIFY_FAILED,
        }
    }

    /// Progress when the stage starts and when it completes
    pub fn progress_window(&self) -> (u8, u8) {
        match self {
            Stage::Validate => (5, 20),
            Stage::Build => (25, 50),
            Stage::Test => (55, 70),
            Stage::Deploy => (75, 90),
            Stage::Verify => (92, 100),
        }
    }
}

/// Step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One named stage of the attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStep {
    pub name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeploymentStep {
    pub fn pending(stage: Stage) -> Self {
        Self {
            name: stage.as_str().to_string(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Result of a single pre-deploy check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

impl ValidationResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
        }
    }
}

/// Structured error of a failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl DeploymentError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            stack: None,
            step: None,
        }
    }

    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.step = Some(stage.as_str().to_string());
        self
    }

    /// Build from an error returned by a deploy target.
    ///
    /// The outermost context is the message; the full chain is kept as the
    /// stack when there is more than one cause.
    pub fn from_stage_failure(stage: Stage, err: &anyhow::Error) -> Self {
        let stack = if err.chain().count() > 1 {
            Some(format!("{:?}", err))
        } else {
            None
        };
        Self {
            code: stage.failure_code().to_string(),
            message: err.to_string(),
            stack,
            step: Some(stage.as_str().to_string()),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.code == codes::DEPLOYMENT_CANCELLED
    }
}

impl std::fmt::Display for DeploymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Format a log line as `[HH:MM:SS] message`
pub fn log_line(at: DateTime<Utc>, message: &str) -> String {
    format!("[{}] {}", at.format("%H:%M:%S"), message)
}

/// Snapshot of one deployment attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentState {
    pub status: DeploymentStatus,
    pub progress: u8,
    pub validations: Vec<ValidationResult>,
    pub steps: Vec<DeploymentStep>,
    pub logs: Vec<String>,
    pub deployment_url: Option<String>,

    /// URL returned by the deploy stage. Promoted to `deployment_url` on
    /// success; kept here when a later stage fails or the attempt is cancelled.
    pub partial_deployment_url: Option<String>,
    pub build_id: Option<String>,
    pub error: Option<DeploymentError>,

    /// Set by `cancel_deployment`, observed by the running attempt
    pub cancel_requested: bool,

    /// Increments on every `deploy`
    pub attempt: u64,
}

impl DeploymentState {
    pub fn idle(attempt: u64) -> Self {
        Self {
            status: DeploymentStatus::Idle,
            progress: 0,
            validations: Vec::new(),
            steps: Vec::new(),
            logs: Vec::new(),
            deployment_url: None,
            partial_deployment_url: None,
            build_id: None,
            error: None,
            cancel_requested: false,
            attempt,
        }
    }

    /// Fresh state for a newly started attempt
    pub fn started(attempt: u64) -> Self {
        Self {
            status: DeploymentStatus::Validating,
            steps: Stage::ALL.iter().map(|s| DeploymentStep::pending(*s)).collect(),
            ..Self::idle(attempt)
        }
    }

    pub fn is_deploying(&self) -> bool {
        self.status.is_deploying()
    }

    pub fn can_deploy(&self) -> bool {
        self.status.can_deploy()
    }

    pub fn has_error(&self) -> bool {
        self.status == DeploymentStatus::Error
    }

    pub fn is_success(&self) -> bool {
        self.status == DeploymentStatus::Success
    }

    pub fn push_log(&mut self, message: &str) {
        self.logs.push(log_line(Utc::now(), message));
    }

    /// Raise progress, never lowering it
    pub fn raise_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    pub fn step_mut(&mut self, stage: Stage) -> Option<&mut DeploymentStep> {
        self.steps.iter_mut().find(|s| s.name == stage.as_str())
    }

    pub fn mark_step(&mut self, stage: Stage, status: StepStatus) {
        let now = Utc::now();
        if let Some(step) = self.step_mut(stage) {
            match status {
                StepStatus::Running => step.started_at = Some(now),
                StepStatus::Completed | StepStatus::Failed => step.completed_at = Some(now),
                _ => {}
            }
            step.status = status;
        }
    }

    /// Fail the running step and skip every step that never started
    pub fn close_open_steps(&mut self) {
        let now = Utc::now();
        for step in self.steps.iter_mut() {
            match step.status {
                StepStatus::Running => {
                    step.status = StepStatus::Failed;
                    step.completed_at = Some(now);
                }
                StepStatus::Pending => step.status = StepStatus::Skipped,
                _ => {}
            }
        }
    }
}

impl Default for DeploymentState {
    fn default() -> Self {
        Self::idle(0)
    }
}

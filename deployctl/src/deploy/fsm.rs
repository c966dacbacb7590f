//! Finite State Machine for a deployment attempt

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// FSM settings
#[derive(Debug, Clone)]
pub struct FsmSettings {
    /// Upper bound for a single stage (validate, build, test, deploy, verify)
    pub stage_timeout: Duration,

    /// End the attempt when any validation check fails
    pub abort_on_failed_validation: bool,
}

impl Default for FsmSettings {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(300),
            abort_on_failed_validation: true,
        }
    }
}

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Resting state, nothing in flight
    Idle,

    /// Running pre-deploy checks
    Validating,

    /// Building the artifact
    Building,

    /// Running the test suite
    Testing,

    /// Pushing to the platform and verifying
    Deploying,

    /// Terminal: deployed
    Success,

    /// Terminal: failed or cancelled
    Error,
}

impl DeploymentStatus {
    pub const ALL: [DeploymentStatus; 7] = [
        DeploymentStatus::Idle,
        DeploymentStatus::Validating,
        DeploymentStatus::Building,
        DeploymentStatus::Testing,
        DeploymentStatus::Deploying,
        DeploymentStatus::Success,
        DeploymentStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Idle => "idle",
            DeploymentStatus::Validating => "validating",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Testing => "testing",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Error => "error",
        }
    }

    /// A stage is running
    pub fn is_deploying(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Validating
                | DeploymentStatus::Building
                | DeploymentStatus::Testing
                | DeploymentStatus::Deploying
        )
    }

    /// `success` or `error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Error)
    }

    /// A new attempt may be started
    pub fn can_deploy(&self) -> bool {
        !self.is_deploying()
    }

    /// Compute the status reached by applying `event`
    pub fn apply(&self, event: &DeploymentEvent) -> Result<DeploymentStatus, String> {
        use DeploymentEvent as E;
        use DeploymentStatus as S;

        let next = match (self, event) {
            // Start from rest or from a finished attempt
            (S::Idle | S::Success | S::Error, E::Start) => S::Validating,

            // Stage progression is strictly sequential
            (S::Validating, E::Advance) => S::Building,
            (S::Building, E::Advance) => S::Testing,
            (S::Testing, E::Advance) => S::Deploying,
            (S::Deploying, E::Succeed) => S::Success,

            // Any running stage may fail or be cancelled
            (s, E::Fail | E::Cancel) if s.is_deploying() => S::Error,

            // Only terminal states go back to rest
            (S::Success | S::Error, E::Reset) => S::Idle,

            (state, event) => {
                return Err(format!("{} -> {:?}", state, event));
            }
        };

        Ok(next)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    /// Accepts any casing, so both `success` and `SUCCESS` parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(DeploymentStatus::Idle),
            "validating" => Ok(DeploymentStatus::Validating),
            "building" => Ok(DeploymentStatus::Building),
            "testing" => Ok(DeploymentStatus::Testing),
            "deploying" => Ok(DeploymentStatus::Deploying),
            "success" => Ok(DeploymentStatus::Success),
            "error" => Ok(DeploymentStatus::Error),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// Deployment event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// Begin a new attempt
    Start,

    /// Current stage completed, move to the next one
    Advance,

    /// Final stage completed
    Succeed,

    /// Current stage failed
    Fail,

    /// Caller cancelled the attempt
    Cancel,

    /// Return a finished attempt to rest
    Reset,
}

//! Settings file management

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deploy::fsm::FsmSettings;
use crate::deploy::simulated;
use crate::logs::LogLevel;
use crate::models::audit::DEFAULT_DAYS_TO_KEEP;
use crate::workers::retention;

/// deployctl settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily-rolling log files under the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Orchestrator configuration
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Audit log configuration
    #[serde(default)]
    pub audit: AuditSettings,

    /// Simulated deploy target configuration
    #[serde(default)]
    pub simulation: SimulationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            orchestrator: OrchestratorSettings::default(),
            audit: AuditSettings::default(),
            simulation: SimulationSettings::default(),
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Upper bound for one stage, in seconds
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// End the attempt on any failed validation
    #[serde(default = "default_true")]
    pub abort_on_failed_validation: bool,
}

fn default_true() -> bool {
    true
}

fn default_stage_timeout() -> u64 {
    300
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout(),
            abort_on_failed_validation: true,
        }
    }
}

impl OrchestratorSettings {
    pub fn fsm_settings(&self) -> FsmSettings {
        FsmSettings {
            stage_timeout: Duration::from_secs(self.stage_timeout_secs),
            abort_on_failed_validation: self.abort_on_failed_validation,
        }
    }
}

/// Audit log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Entries older than this many days are removed by cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// How often the retention worker runs, in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_retention_days() -> u32 {
    DEFAULT_DAYS_TO_KEEP
}

fn default_cleanup_interval() -> u64 {
    24 * 60 * 60
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl AuditSettings {
    pub fn retention_options(&self) -> retention::Options {
        retention::Options {
            interval: Duration::from_secs(self.cleanup_interval_secs),
            days_to_keep: self.retention_days,
            ..Default::default()
        }
    }
}

/// Simulated target settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Time each simulated stage takes, in milliseconds
    #[serde(default = "default_stage_delay")]
    pub stage_delay_ms: u64,
}

fn default_stage_delay() -> u64 {
    400
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            stage_delay_ms: default_stage_delay(),
        }
    }
}

impl SimulationSettings {
    pub fn target_options(&self) -> simulated::Options {
        simulated::Options {
            stage_delay: Duration::from_millis(self.stage_delay_ms),
            fail_at: None,
        }
    }
}

//! Timed stand-in for a real platform integration

use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use tracing::debug;

use crate::deploy::state::{Stage, ValidationResult};
use crate::deploy::target::{BuildOutput, DeployTarget};
use crate::models::deployment::{DeploymentConfig, Platform};
use crate::utils::generate_uuid;

/// Simulated target options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time each stage takes
    pub stage_delay: Duration,

    /// Stage that reports a failure, if any
    pub fail_at: Option<Stage>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            stage_delay: Duration::from_millis(400),
            fail_at: None,
        }
    }
}

/// Walks through every stage with a fixed delay and succeeds unless told
/// to fail at a given stage.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTarget {
    options: Options,
}

impl SimulatedTarget {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    async fn run_stage(&self, stage: Stage) -> anyhow::Result<()> {
        debug!("Simulating stage: {}", stage.as_str());
        tokio::time::sleep(self.options.stage_delay).await;
        if self.options.fail_at == Some(stage) {
            bail!("simulated {} failure", stage.as_str());
        }
        Ok(())
    }
}

fn is_valid_branch(branch: &str) -> bool {
    !branch.is_empty()
        && !branch.starts_with('-')
        && !branch.ends_with('/')
        && !branch.contains("..")
        && branch
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'))
}

#[async_trait]
impl DeployTarget for SimulatedTarget {
    async fn validate(&self, config: &DeploymentConfig) -> Vec<ValidationResult> {
        tokio::time::sleep(self.options.stage_delay).await;

        let mut results = Vec::with_capacity(4);

        if is_valid_branch(&config.branch) {
            results.push(ValidationResult::pass("branch", format!("Branch '{}' is valid", config.branch)));
        } else {
            results.push(ValidationResult::fail("branch", format!("Invalid branch name '{}'", config.branch)));
        }

        match config.config_id.as_deref() {
            Some(id) if !id.trim().is_empty() => {
                results.push(ValidationResult::pass("configuration", format!("Using configuration '{}'", id)));
            }
            _ => {
                results.push(ValidationResult::pass("configuration", "Using default configuration"));
            }
        }

        results.push(ValidationResult::pass(
            "platform",
            format!("Platform '{}' is supported", config.platform),
        ));

        if self.options.fail_at == Some(Stage::Validate) {
            results.push(ValidationResult::fail("environment", "Required environment variables are missing"));
        } else {
            results.push(ValidationResult::pass("environment", "Environment variables present"));
        }

        results
    }

    async fn build(&self, _config: &DeploymentConfig) -> anyhow::Result<BuildOutput> {
        self.run_stage(Stage::Build).await?;
        let build_id = generate_uuid();
        Ok(BuildOutput {
            build_id: format!("build-{}", &build_id[..8]),
        })
    }

    async fn test(&self, _config: &DeploymentConfig, _build: &BuildOutput) -> anyhow::Result<()> {
        self.run_stage(Stage::Test).await
    }

    async fn deploy(&self, config: &DeploymentConfig, build: &BuildOutput) -> anyhow::Result<String> {
        self.run_stage(Stage::Deploy).await?;
        let slug = build
            .build_id
            .strip_prefix("build-")
            .ok_or_else(|| anyhow!("malformed build id {}", build.build_id))?;
        let url = match config.platform {
            Platform::Vercel => format!("https://{}.vercel.app", slug),
            Platform::Netlify => format!("https://{}.netlify.app", slug),
            Platform::Railway => format!("https://{}.up.railway.app", slug),
            Platform::Render => format!("https://{}.onrender.com", slug),
            Platform::Heroku => format!("https://{}.herokuapp.com", slug),
            other => format!("https://{}.{}.example.com", slug, other),
        };
        Ok(url)
    }

    async fn verify(&self, _config: &DeploymentConfig, url: &str) -> anyhow::Result<()> {
        debug!("Verifying {}", url);
        self.run_stage(Stage::Verify).await
    }
}

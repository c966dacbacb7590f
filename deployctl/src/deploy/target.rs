//! Platform integration seam

use async_trait::async_trait;

use crate::deploy::state::ValidationResult;
use crate::models::deployment::DeploymentConfig;

/// Artifact produced by the build stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub build_id: String,
}

/// The platform-specific work behind each stage.
///
/// Implementations are opaque to the orchestrator: it only sequences the
/// calls, bounds each with a timeout and drops the future on cancellation.
#[async_trait]
pub trait DeployTarget: Send + Sync {
    /// Run pre-deploy checks. Every check is recorded, passed or not.
    async fn validate(&self, config: &DeploymentConfig) -> Vec<ValidationResult>;

    async fn build(&self, config: &DeploymentConfig) -> anyhow::Result<BuildOutput>;

    async fn test(&self, config: &DeploymentConfig, build: &BuildOutput) -> anyhow::Result<()>;

    /// Push the build and return the public URL
    async fn deploy(&self, config: &DeploymentConfig, build: &BuildOutput) -> anyhow::Result<String>;

    async fn verify(&self, config: &DeploymentConfig, url: &str) -> anyhow::Result<()>;
}

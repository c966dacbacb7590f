//! Deployment models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default branch when none is given
pub const DEFAULT_BRANCH: &str = "main";

pub fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

/// Hosting platform a deployment targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Vercel,
    Netlify,
    Railway,
    Render,
    Heroku,
    Aws,
    Docker,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Vercel => "vercel",
            Platform::Netlify => "netlify",
            Platform::Railway => "railway",
            Platform::Render => "render",
            Platform::Heroku => "heroku",
            Platform::Aws => "aws",
            Platform::Docker => "docker",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vercel" => Ok(Platform::Vercel),
            "netlify" => Ok(Platform::Netlify),
            "railway" => Ok(Platform::Railway),
            "render" => Ok(Platform::Render),
            "heroku" => Ok(Platform::Heroku),
            "aws" => Ok(Platform::Aws),
            "docker" => Ok(Platform::Docker),
            _ => Err(format!("Unsupported platform: {}", s)),
        }
    }
}

/// Configuration for one deployment attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    /// Target platform
    pub platform: Platform,

    /// Source branch
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Named configuration the attempt was launched from
    #[serde(default)]
    pub config_id: Option<String>,

    /// Commit being deployed, when known
    #[serde(default)]
    pub commit_hash: Option<String>,

    /// Free-form data carried into the audit record
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl DeploymentConfig {
    /// Create a config for `platform` on the default branch
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            branch: default_branch(),
            config_id: None,
            commit_hash: None,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_config_id(mut self, config_id: impl Into<String>) -> Self {
        self.config_id = Some(config_id.into());
        self
    }

    pub fn with_commit_hash(mut self, commit_hash: impl Into<String>) -> Self {
        self.commit_hash = Some(commit_hash.into());
        self
    }
}

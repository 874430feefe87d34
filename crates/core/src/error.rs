use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Invalid or missing run configuration. Raised before anything is provisioned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--branch or --pr is required")]
    MissingTarget,
    #[error("--branch and --pr are mutually exclusive")]
    ConflictingTarget,
    #[error("--branch-upgrade-from or --pr-upgrade-from is required when doing an upgrade test")]
    MissingUpgradeFrom,
    #[error("invalid repository '{0}', expected 'owner/name'")]
    InvalidRepository(String),
    #[error("invalid instance name '{0}', expected ASCII letters, digits and inner hyphens")]
    InvalidInstance(String),
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("failed to read settings file {}", .path.display())]
    ReadSettings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {}", .path.display())]
    ParseSettings {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// A build artifact could not be located or downloaded.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no successful {workflow} run found for {target}")]
    RunNotFound { workflow: String, target: String },
    #[error("pull request {repo}#{number} not found")]
    PullRequestNotFound { repo: String, number: u64 },
    #[error("artifact {name} not found in {repo} run {run_id}")]
    ArtifactNotFound { repo: String, name: String, run_id: u64 },
    #[error("artifact {name} in {repo} run {run_id} has expired")]
    ArtifactExpired { repo: String, name: String, run_id: u64 },
    #[error("failed to write artifact to {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

/// A best-effort cleanup action that did not succeed. Logged, never escalated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub action: String,
    pub message: String,
}

impl CleanupWarning {
    pub fn new(action: impl Into<String>, message: impl fmt::Display) -> Self {
        Self { action: action.into(), message: message.to_string() }
    }
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.action, self.message)
    }
}

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_SETTINGS_PATH: &str = "check-pr.yml";

/// Settings loaded from the YAML settings file. Every field is optional in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub github: GitHubConfig,
    pub workflow: String,
    pub python: String,
    pub deployment_archive_prefix: String,
    pub test_targets: Vec<String>,
    pub settle_delay_secs: u64,
    pub endpoint_domain: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            github: GitHubConfig::default(),
            workflow: "ci.yml".to_string(),
            python: "python".to_string(),
            deployment_archive_prefix: "onefuzz-deployment".to_string(),
            test_targets: vec!["windows-onefuzz-sample".to_string()],
            settle_delay_secs: 30,
            endpoint_domain: "azurewebsites.net".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubConfig {
    pub token: Option<String>,
}

impl Settings {
    /// Load settings from `path`. A missing file at the default location yields the defaults,
    /// a missing file anywhere else is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_SETTINGS_PATH), false),
        };
        let mut settings = match std::fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&contents)
                .map_err(|source| ConfigError::ParseSettings { path: path.clone(), source })?,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings file at {}, using defaults", path.display());
                Self::default()
            }
            Err(source) => return Err(ConfigError::ReadSettings { path, source }),
        };
        if settings.github.token.is_none() {
            settings.github.token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        }
        Ok(settings)
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }
}

/// Knobs for the external tooling a run drives.
#[derive(Debug, Clone)]
pub struct Tooling {
    pub workflow: String,
    pub python: String,
    pub deployment_archive_prefix: String,
    pub test_targets: Vec<String>,
    pub settle_delay: Duration,
    pub endpoint_domain: String,
}

impl Default for Tooling {
    fn default() -> Self { Self::from(&Settings::default()) }
}

impl From<&Settings> for Tooling {
    fn from(settings: &Settings) -> Self {
        Self {
            workflow: settings.workflow.clone(),
            python: settings.python.clone(),
            deployment_archive_prefix: settings.deployment_archive_prefix.clone(),
            test_targets: settings.test_targets.clone(),
            settle_delay: Duration::from_secs(settings.settle_delay_secs),
            endpoint_domain: settings.endpoint_domain.clone(),
        }
    }
}

/// A branch or a pull request in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeRef {
    Branch(String),
    PullRequest(u64),
}

impl fmt::Display for ChangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeRef::Branch(branch) => write!(f, "branch:{branch}"),
            ChangeRef::PullRequest(number) => write!(f, "pr:{number}"),
        }
    }
}

/// A resolved change in a repository (`owner/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub repo: String,
    pub change: ChangeRef,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/[{}]", self.repo, self.change)
    }
}

/// Where the upgrade test deploys from before upgrading to the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeFrom {
    pub repo: String,
    pub branch: Option<String>,
    pub pr: Option<u64>,
}

impl Default for UpgradeFrom {
    fn default() -> Self {
        Self { repo: "microsoft/onefuzz".to_string(), branch: Some("main".to_string()), pr: None }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunPolicy {
    pub skip_tests: bool,
    pub skip_cleanup: bool,
    pub skip_cleanup_on_failure: bool,
    pub merge_on_success: bool,
    pub unattended: bool,
    pub skip_upgrade_test: bool,
    /// Pause for the operator before cleanup so the live environment can be inspected.
    pub confirm_before_cleanup: bool,
}

impl RunPolicy {
    /// The `skip` argument handed to cleanup for a run that ended in `succeeded`.
    pub fn skip_cleanup_for(&self, succeeded: bool) -> bool {
        if succeeded { self.skip_cleanup } else { self.skip_cleanup_on_failure }
    }
}

/// One validation run. Built once and never mutated afterward.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub repo: String,
    pub branch: Option<String>,
    pub pr: Option<u64>,
    pub region: String,
    pub instance: String,
    pub subscription_id: Option<String>,
    pub authority: Option<String>,
    pub policy: RunPolicy,
    pub upgrade_from: UpgradeFrom,
    pub test_args: Vec<String>,
    pub tooling: Tooling,
}

/// The targets of a run after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub target: Target,
    /// `None` when the upgrade test is skipped.
    pub upgrade_from: Option<Target>,
}

impl RunConfig {
    pub fn validate(&self) -> Result<RunPlan, ConfigError> {
        if self.instance.trim().is_empty() {
            return Err(ConfigError::Empty("instance"));
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::Empty("region"));
        }
        if !valid_instance_name(&self.instance) {
            return Err(ConfigError::InvalidInstance(self.instance.clone()));
        }
        resolve_targets(
            &self.repo,
            self.branch.as_deref(),
            self.pr,
            &self.upgrade_from,
            self.policy.skip_upgrade_test,
        )
    }
}

/// Resolve the primary target and the upgrade-from target from raw selections.
///
/// Exactly one of `branch` and `pr` must be set. When both an upgrade-from pull request and
/// branch are available the pull request wins, since the branch usually carries a default.
pub fn resolve_targets(
    repo: &str,
    branch: Option<&str>,
    pr: Option<u64>,
    upgrade_from: &UpgradeFrom,
    skip_upgrade_test: bool,
) -> Result<RunPlan, ConfigError> {
    let change = match (branch.filter(|b| !b.is_empty()), pr) {
        (Some(_), Some(_)) => return Err(ConfigError::ConflictingTarget),
        (Some(branch), None) => ChangeRef::Branch(branch.to_string()),
        (None, Some(pr)) => ChangeRef::PullRequest(pr),
        (None, None) => return Err(ConfigError::MissingTarget),
    };
    let target = Target { repo: check_repo(repo)?, change };
    if skip_upgrade_test {
        return Ok(RunPlan { target, upgrade_from: None });
    }
    let change = match (upgrade_from.pr, upgrade_from.branch.as_deref().filter(|b| !b.is_empty())) {
        (Some(pr), _) => ChangeRef::PullRequest(pr),
        (None, Some(branch)) => ChangeRef::Branch(branch.to_string()),
        (None, None) => return Err(ConfigError::MissingUpgradeFrom),
    };
    let upgrade_from = Target { repo: check_repo(&upgrade_from.repo)?, change };
    Ok(RunPlan { target, upgrade_from: Some(upgrade_from) })
}

/// Accept `owner/name` or a repository URL such as `https://github.com/owner/name.git`, and
/// return the `owner/name` form.
fn check_repo(repo: &str) -> Result<String, ConfigError> {
    static URL_REGEX: OnceLock<Regex> = OnceLock::new();
    let url_regex = URL_REGEX.get_or_init(|| {
        Regex::new(r"^https?://(?:www\.)?github\.com/([^/\s]+)/([^/\s]+?)(?:\.git)?/?$")
            .unwrap()
    });
    let repo = repo.trim();
    let parts = match url_regex.captures(repo) {
        Some(caps) => {
            caps.get(1).zip(caps.get(2)).map(|(owner, name)| (owner.as_str(), name.as_str()))
        }
        None => repo.split_once('/'),
    };
    match parts {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(format!("{owner}/{name}"))
        }
        _ => Err(ConfigError::InvalidRepository(repo.to_string())),
    }
}

/// The instance names the resource group and the service hostname, so it is limited to ASCII
/// alphanumerics and inner hyphens.
fn valid_instance_name(instance: &str) -> bool {
    !instance.starts_with('-')
        && !instance.ends_with('-')
        && instance.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunConfig {
        RunConfig {
            repo: "microsoft/onefuzz".to_string(),
            branch: Some("feature".to_string()),
            pr: None,
            region: "eastus2".to_string(),
            instance: "pr-check-test".to_string(),
            subscription_id: None,
            authority: None,
            policy: RunPolicy::default(),
            upgrade_from: UpgradeFrom::default(),
            test_args: vec![],
            tooling: Tooling::default(),
        }
    }

    #[test]
    fn test_requires_branch_or_pr() {
        let mut config = config();
        config.branch = None;
        assert!(matches!(config.validate(), Err(ConfigError::MissingTarget)));
        config.branch = Some(String::new());
        assert!(matches!(config.validate(), Err(ConfigError::MissingTarget)));
    }

    #[test]
    fn test_branch_and_pr_are_exclusive() {
        let mut config = config();
        config.pr = Some(12);
        assert!(matches!(config.validate(), Err(ConfigError::ConflictingTarget)));
    }

    #[test]
    fn test_upgrade_from_required_unless_skipped() {
        let mut config = config();
        config.upgrade_from.branch = None;
        assert!(matches!(config.validate(), Err(ConfigError::MissingUpgradeFrom)));

        config.policy.skip_upgrade_test = true;
        let plan = config.validate().unwrap();
        assert_eq!(plan.upgrade_from, None);
    }

    #[test]
    fn test_upgrade_from_prefers_pr() {
        let mut config = config();
        config.upgrade_from.pr = Some(7);
        let plan = config.validate().unwrap();
        assert_eq!(plan.target.change, ChangeRef::Branch("feature".to_string()));
        assert_eq!(
            plan.upgrade_from,
            Some(Target {
                repo: "microsoft/onefuzz".to_string(),
                change: ChangeRef::PullRequest(7)
            })
        );
    }

    #[test]
    fn test_rejects_bad_repository() {
        for repo in ["onefuzz", "/onefuzz", "microsoft/", "a/b/c"] {
            let mut config = config();
            config.repo = repo.to_string();
            assert!(matches!(config.validate(), Err(ConfigError::InvalidRepository(_))), "{repo}");
        }
    }

    #[test]
    fn test_accepts_repository_url() {
        for repo in [
            "https://github.com/microsoft/onefuzz",
            "https://github.com/microsoft/onefuzz/",
            "https://github.com/microsoft/onefuzz.git",
            " microsoft/onefuzz ",
        ] {
            let mut config = config();
            config.repo = repo.to_string();
            config.upgrade_from.repo = repo.to_string();
            let plan = config.validate().unwrap();
            assert_eq!(plan.target.repo, "microsoft/onefuzz", "{repo}");
            assert_eq!(plan.upgrade_from.unwrap().repo, "microsoft/onefuzz", "{repo}");
        }
        let mut config = config();
        config.repo = "https://github.com/microsoft/onefuzz/pull/17".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRepository(_))));
        config.repo = "https://gitlab.com/microsoft/onefuzz".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRepository(_))));
    }

    #[test]
    fn test_rejects_bad_instance_name() {
        for instance in ["pr-check-o'brien-1234", "pr check", "-pr-check", "pr-check-", "pr_check"] {
            let mut config = config();
            config.instance = instance.to_string();
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidInstance(_))),
                "{instance}"
            );
        }
        let mut config = config();
        config.instance = "pr-check-obrien-0a1b2c3d".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cleanup_skip_policy() {
        let policy =
            RunPolicy { skip_cleanup: true, skip_cleanup_on_failure: false, ..Default::default() };
        assert!(policy.skip_cleanup_for(true));
        assert!(!policy.skip_cleanup_for(false));
    }

    #[test]
    fn test_parse_settings() {
        let settings = Settings::parse("workflow: build.yml\ntest_targets: [linux-libfuzzer]\n")
            .unwrap();
        assert_eq!(settings.workflow, "build.yml");
        assert_eq!(settings.test_targets, vec!["linux-libfuzzer".to_string()]);
        assert_eq!(settings.python, "python");
        assert_eq!(settings.settle_delay_secs, 30);
        assert!(Settings::parse("").is_ok());
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yml");
        assert!(matches!(Settings::load(Some(&path)), Err(ConfigError::ReadSettings { .. })));
    }
}

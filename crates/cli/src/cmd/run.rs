use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use argp::FromArgs;
use check_pr_core::{
    ConfigError,
    config::{RunConfig, RunPolicy, Settings, Tooling, UpgradeFrom, resolve_targets},
    naming::generate_instance_name,
};
use check_pr_github::GitHub;
use check_pr_runner::{
    Orchestrator, RunError, RunReport, ShellSteps, cleanup::AzIdentityCleanup,
    gate::StdinConfirmation, process::SystemRunner, register::TokenCheck,
};

use crate::{
    cmd::name::signed_in_nickname,
    util::{native_path, pull_request_number},
};

const CONFIGURATION_ERROR: u8 = 2;

#[derive(FromArgs, PartialEq, Eq, Debug, Default)]
/// Deploy a build of a branch or pull request, run the integration tests against it and clean
/// up afterwards.
#[argp(subcommand, name = "run")]
pub struct Args {
    #[argp(option, from_str_fn(native_path))]
    /// settings file (default: check-pr.yml)
    config: Option<PathBuf>,
    #[argp(option)]
    /// instance name (default: pr-check-<nickname>-<random>)
    instance: Option<String>,
    #[argp(option)]
    /// branch to validate
    branch: Option<String>,
    #[argp(option, from_str_fn(pull_request_number))]
    /// pull request to validate
    pr: Option<u64>,
    #[argp(option, default = "String::from(\"microsoft/onefuzz\")")]
    /// repository to validate
    repo: String,
    #[argp(option, default = "String::from(\"eastus2\")")]
    /// region to deploy to
    region: String,
    #[argp(option)]
    /// subscription to deploy to (default: the az CLI's current subscription)
    subscription_id: Option<String>,
    #[argp(option)]
    /// identity authority, used to confirm registered credentials are usable
    authority: Option<String>,
    #[argp(option, default = "String::from(\"main\")")]
    /// branch to upgrade from
    branch_upgrade_from: String,
    #[argp(option, from_str_fn(pull_request_number))]
    /// pull request to upgrade from, preferred over the branch
    pr_upgrade_from: Option<u64>,
    #[argp(option, default = "String::from(\"microsoft/onefuzz\")")]
    /// repository to upgrade from
    repo_upgrade_from: String,
    #[argp(option)]
    /// workflow that publishes the artifacts (overrides the settings file)
    workflow: Option<String>,
    #[argp(option)]
    /// python interpreter used to create environments (overrides the settings file)
    python: Option<String>,
    #[argp(switch)]
    /// deploy only, without running the integration tests
    skip_tests: bool,
    #[argp(switch)]
    /// keep the deployment after a successful run
    skip_cleanup: bool,
    #[argp(switch)]
    /// keep the deployment after a failed run
    skip_cleanup_on_failure: bool,
    #[argp(switch)]
    /// merge the pull request if the run succeeds
    merge_on_success: bool,
    #[argp(switch)]
    /// register service credentials and never prompt
    unattended: bool,
    #[argp(switch)]
    /// deploy the target directly instead of upgrading an existing deployment
    skip_upgrade_test: bool,
    #[argp(switch)]
    /// do not wait for confirmation before cleanup
    no_confirm: bool,
    #[argp(positional)]
    /// extra arguments passed to the integration test tool (after --)
    test_args: Vec<String>,
}

impl Args {
    fn upgrade_from(&self) -> UpgradeFrom {
        UpgradeFrom {
            repo: self.repo_upgrade_from.clone(),
            branch: Some(self.branch_upgrade_from.clone()).filter(|b| !b.is_empty()),
            pr: self.pr_upgrade_from,
        }
    }

    fn policy(&self) -> RunPolicy {
        RunPolicy {
            skip_tests: self.skip_tests,
            skip_cleanup: self.skip_cleanup,
            skip_cleanup_on_failure: self.skip_cleanup_on_failure,
            merge_on_success: self.merge_on_success,
            unattended: self.unattended,
            skip_upgrade_test: self.skip_upgrade_test,
            confirm_before_cleanup: !self.no_confirm && !self.unattended,
        }
    }

    fn tooling(&self, settings: &Settings) -> Tooling {
        let mut tooling = Tooling::from(settings);
        if let Some(workflow) = &self.workflow {
            tooling.workflow = workflow.clone();
        }
        if let Some(python) = &self.python {
            tooling.python = python.clone();
        }
        tooling
    }

    fn into_run_config(self, settings: &Settings, instance: String) -> RunConfig {
        RunConfig {
            upgrade_from: self.upgrade_from(),
            policy: self.policy(),
            tooling: self.tooling(settings),
            repo: self.repo,
            branch: self.branch,
            pr: self.pr,
            region: self.region,
            instance,
            subscription_id: self.subscription_id,
            authority: self.authority,
            test_args: self.test_args,
        }
    }
}

pub async fn run(args: Args) -> Result<ExitCode> {
    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => return Ok(configuration_error(&e)),
    };
    // Reject bad target selections before asking anything of the cloud CLI
    if let Err(e) = resolve_targets(
        &args.repo,
        args.branch.as_deref(),
        args.pr,
        &args.upgrade_from(),
        args.skip_upgrade_test,
    ) {
        return Ok(configuration_error(&e));
    }

    let instance = match &args.instance {
        Some(instance) => instance.clone(),
        None => {
            let nickname = signed_in_nickname(&SystemRunner)
                .await
                .context("Failed to determine an instance name, pass --instance")?;
            generate_instance_name(&nickname)
        }
    };
    let config = args.into_run_config(&settings, instance);

    let github = GitHub::new(&settings.github).await?;
    let steps = ShellSteps::new(
        SystemRunner,
        config.tooling.clone(),
        config.authority.as_deref().map(TokenCheck::new),
        AzIdentityCleanup { runner: SystemRunner },
    );
    let orchestrator = Orchestrator::new(github, steps, StdinConfirmation);
    tracing::info!(instance = %config.instance, "Starting run in {}", config.region);
    match orchestrator.run(&config).await {
        Ok(report) => Ok(summarize(&report)),
        Err(RunError::Configuration(e)) => Ok(configuration_error(&e)),
        Err(e) => Err(e).context("Failed to start run"),
    }
}

fn configuration_error(error: &ConfigError) -> ExitCode {
    tracing::error!("Invalid configuration: {}", error);
    ExitCode::from(CONFIGURATION_ERROR)
}

fn summarize(report: &RunReport) -> ExitCode {
    if !report.cleanup_warnings.is_empty() {
        tracing::warn!(
            "Cleanup finished with {} warning(s), some resources may remain",
            report.cleanup_warnings.len()
        );
    }
    if report.cleanup_skipped {
        tracing::info!("Cleanup skipped, the deployment was left in place");
    }
    if report.outcome.is_success() {
        tracing::info!("Test run {} succeeded", report.test_run);
        ExitCode::SUCCESS
    } else {
        tracing::error!("Test run {} failed: {}", report.test_run, report.outcome);
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn args() -> Args {
        Args {
            pr: Some(42),
            repo: "microsoft/onefuzz".to_string(),
            region: "eastus2".to_string(),
            branch_upgrade_from: "main".to_string(),
            repo_upgrade_from: "microsoft/onefuzz".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_run_config_from_args() {
        let settings = Settings { settle_delay_secs: 5, ..Default::default() };
        let args = Args {
            workflow: Some("release.yml".to_string()),
            test_args: vec!["--skip-cleanup".to_string()],
            ..args()
        };
        let config = args.into_run_config(&settings, "pr-check-me-1234".to_string());

        let plan = config.validate().unwrap();
        assert_eq!(plan.target.to_string(), "microsoft/onefuzz/[pr:42]");
        assert_eq!(plan.upgrade_from.unwrap().to_string(), "microsoft/onefuzz/[branch:main]");
        assert_eq!(config.tooling.workflow, "release.yml");
        assert_eq!(config.tooling.python, "python");
        assert_eq!(config.tooling.settle_delay, Duration::from_secs(5));
        assert_eq!(config.test_args, vec!["--skip-cleanup".to_string()]);
        assert!(config.policy.confirm_before_cleanup);
    }

    #[test]
    fn test_upgrade_from_pull_request_wins() {
        let args = Args { pr_upgrade_from: Some(7), ..args() };
        let config = args.into_run_config(&Settings::default(), "pr-check-me-1234".to_string());
        let plan = config.validate().unwrap();
        assert_eq!(plan.upgrade_from.unwrap().to_string(), "microsoft/onefuzz/[pr:7]");
    }

    #[test]
    fn test_repository_url_argument() {
        let args = Args { repo: "https://github.com/microsoft/onefuzz".to_string(), ..args() };
        let config = args.into_run_config(&Settings::default(), "pr-check-me-1234".to_string());
        let plan = config.validate().unwrap();
        assert_eq!(plan.target.to_string(), "microsoft/onefuzz/[pr:42]");
    }

    #[test]
    fn test_no_confirmation_when_unattended() {
        let policy = Args { unattended: true, ..args() }.policy();
        assert!(!policy.confirm_before_cleanup);
        let policy = Args { no_confirm: true, ..args() }.policy();
        assert!(!policy.confirm_before_cleanup);
    }

    #[test]
    fn test_empty_upgrade_from_branch() {
        let args = Args { branch_upgrade_from: String::new(), ..args() };
        let config = args.into_run_config(&Settings::default(), "pr-check-me-1234".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::MissingUpgradeFrom)));
    }
}

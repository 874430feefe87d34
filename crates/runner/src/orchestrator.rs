//! Sequences one validation run: artifact acquisition, the optional upgrade-from deployment,
//! test passes, merge, and cleanup.
//!
//! Deployment of slot "0" always completes before slot "1" is deployed, and every test pass
//! follows the deployment of the slot it tests. Any failure aborts the remaining deploy and
//! test steps. Cleanup runs exactly once after validation succeeds, whatever the outcome.

use std::{fmt, path::Path};

use check_pr_core::{
    CleanupWarning, ConfigError,
    config::{RunConfig, RunPlan, Target},
    models::{BuildSlot, DeployedEnvironment, TestRun},
    source::{ArtifactRequest, ArtifactSource},
};
use thiserror::Error;

use crate::{
    error::{StepError, display_chain},
    gate::ConfirmationGate,
    integration::TestInvocation,
    steps::Steps,
};

pub const TEST_ARTIFACT: &str = "integration-test-artifacts";
pub const TEST_ARTIFACT_FILE: &str = "integration-test-artifacts.zip";
pub const RELEASE_ARTIFACT: &str = "release-artifacts";

/// Errors raised before anything is provisioned.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("failed to create run directory")]
    Workspace(#[source] std::io::Error),
}

/// Terminal result of a run.
#[derive(Debug)]
pub enum RunOutcome {
    Success,
    SetupFailure { stage: String, error: anyhow::Error },
    DeploymentFailure { slot: &'static str, error: StepError },
    TestFailure { slot: &'static str, error: StepError },
    MergeFailure { error: anyhow::Error },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool { matches!(self, RunOutcome::Success) }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => f.write_str("success"),
            RunOutcome::SetupFailure { stage, error } => write!(f, "{stage} failed: {error:#}"),
            RunOutcome::DeploymentFailure { slot, error } => {
                write!(f, "deployment of build {slot} failed: {}", display_chain(error))
            }
            RunOutcome::TestFailure { slot, error } => {
                write!(f, "tests of build {slot} failed: {}", display_chain(error))
            }
            RunOutcome::MergeFailure { error } => write!(f, "merge failed: {error:#}"),
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub test_run: TestRun,
    /// The `skip` value cleanup was invoked with.
    pub cleanup_skipped: bool,
    pub cleanup_warnings: Vec<CleanupWarning>,
}

pub struct Orchestrator<A, S, G> {
    source: A,
    steps: S,
    gate: G,
}

type StageResult<T = ()> = Result<T, RunOutcome>;

impl<A, S, G> Orchestrator<A, S, G>
where
    A: ArtifactSource,
    S: Steps,
    G: ConfirmationGate,
{
    pub fn new(source: A, steps: S, gate: G) -> Self { Self { source, steps, gate } }

    /// Run the validation described by `config` inside a temporary run directory, which is
    /// removed before returning.
    pub async fn run(&self, config: &RunConfig) -> Result<RunReport, RunError> {
        let plan = config.validate()?;
        let root =
            tempfile::Builder::new().prefix("check-pr-").tempdir().map_err(RunError::Workspace)?;
        tracing::info!(instance = %config.instance, "Running from within {}", root.path().display());

        let test_run = TestRun::new();
        let mut env = DeployedEnvironment::new(
            &config.instance,
            &config.region,
            config.subscription_id.clone(),
        );
        let outcome = match self.sequence(config, &plan, root.path(), &test_run, &mut env).await {
            Ok(()) => self.merge(config, &plan).await,
            Err(outcome) => outcome,
        };
        if outcome.is_success() {
            tracing::info!("Run of {} succeeded", plan.target);
        } else {
            tracing::error!("Run of {} failed: {}", plan.target, outcome);
        }

        if config.policy.confirm_before_cleanup
            && let Err(e) = self.gate.confirm("Press Enter to continue with cleanup").await
        {
            tracing::warn!("Confirmation failed, continuing with cleanup: {}", e);
        }
        let cleanup_skipped = config.policy.skip_cleanup_for(outcome.is_success());
        let cleanup_warnings = self.steps.cleanup(&config.instance, cleanup_skipped).await;
        for warning in &cleanup_warnings {
            tracing::warn!("Cleanup: {}", warning);
        }

        if let Err(e) = root.close() {
            tracing::warn!("Failed to remove run directory: {}", e);
        }
        Ok(RunReport { outcome, test_run, cleanup_skipped, cleanup_warnings })
    }

    async fn sequence(
        &self,
        config: &RunConfig,
        plan: &RunPlan,
        root: &Path,
        test_run: &TestRun,
        env: &mut DeployedEnvironment,
    ) -> StageResult {
        let policy = &config.policy;
        let test_artifact = root.join(TEST_ARTIFACT_FILE);
        if !policy.skip_tests {
            self.fetch(config, &plan.target, TEST_ARTIFACT, &test_artifact).await?;
        }

        let old = match &plan.upgrade_from {
            Some(upgrade_from) => {
                tracing::info!("Pre-upgrade deploying from {}", upgrade_from);
                let slot =
                    self.prepare_slot(config, root, BuildSlot::UPGRADE_FROM, upgrade_from).await?;
                self.deploy(&slot, env, policy.unattended).await?;
                Some(slot)
            }
            None => None,
        };

        let new = self.prepare_slot(config, root, BuildSlot::TARGET, &plan.target).await?;
        match &old {
            None => tracing::info!("Deploying from {}", plan.target),
            Some(old) => {
                if !policy.skip_tests {
                    tracing::info!("Pre-upgrade starting tests");
                    // Exercises the old build minimally to establish a baseline
                    let invocation = test_invocation(
                        config,
                        test_run,
                        old.label,
                        false,
                        true,
                        &test_artifact,
                        root,
                    );
                    self.test(old.label, &invocation, env).await?;
                }
                tracing::info!("Upgrading to {}", plan.target);
            }
        }
        self.deploy(&new, env, policy.unattended).await?;

        if !policy.skip_tests {
            if old.is_none() {
                tracing::info!("Running tests");
            } else {
                tracing::info!("Running post-upgrade tests");
            }
            let invocation = test_invocation(
                config,
                test_run,
                new.label,
                true,
                old.is_none(),
                &test_artifact,
                root,
            );
            self.test(new.label, &invocation, env).await?;
        }
        Ok(())
    }

    async fn fetch(
        &self,
        config: &RunConfig,
        target: &Target,
        name: &str,
        dest: &Path,
    ) -> StageResult {
        let request = ArtifactRequest { target, workflow: &config.tooling.workflow, name };
        self.source.fetch_artifact(request, dest).await.map_err(|e| RunOutcome::SetupFailure {
            stage: format!("fetching {name} for {target}"),
            error: e.into(),
        })
    }

    async fn prepare_slot(
        &self,
        config: &RunConfig,
        root: &Path,
        label: &'static str,
        target: &Target,
    ) -> StageResult<BuildSlot> {
        let slot = BuildSlot::create(root, label).map_err(|e| RunOutcome::SetupFailure {
            stage: format!("creating slot {label}"),
            error: e.into(),
        })?;
        self.fetch(config, target, RELEASE_ARTIFACT, &slot.archive).await?;
        Ok(slot)
    }

    async fn deploy(
        &self,
        slot: &BuildSlot,
        env: &mut DeployedEnvironment,
        unattended: bool,
    ) -> StageResult {
        self.steps
            .deploy(slot, env, unattended)
            .await
            .map_err(|error| RunOutcome::DeploymentFailure { slot: slot.label, error })
    }

    async fn test(
        &self,
        slot: &'static str,
        invocation: &TestInvocation<'_>,
        env: &DeployedEnvironment,
    ) -> StageResult {
        self.steps
            .test(invocation, env)
            .await
            .map_err(|error| RunOutcome::TestFailure { slot, error })
    }

    async fn merge(&self, config: &RunConfig, plan: &RunPlan) -> RunOutcome {
        if !config.policy.merge_on_success {
            return RunOutcome::Success;
        }
        match self.source.merge_change_request(&plan.target).await {
            Ok(()) => RunOutcome::Success,
            Err(error) => RunOutcome::MergeFailure { error },
        }
    }
}

fn test_invocation<'a>(
    config: &'a RunConfig,
    test_run: &'a TestRun,
    build_label: &'a str,
    check_results: bool,
    is_first_run: bool,
    artifact: &'a Path,
    root: &'a Path,
) -> TestInvocation<'a> {
    TestInvocation {
        test_run,
        build_label,
        check_results,
        is_first_run,
        artifact,
        root,
        region: &config.region,
        authority: config.authority.as_deref(),
        extra_args: &config.test_args,
    }
}

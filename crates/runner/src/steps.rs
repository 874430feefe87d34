use check_pr_core::{
    CleanupWarning,
    config::Tooling,
    models::{BuildSlot, DeployedEnvironment},
};

use crate::{
    cleanup::{CleanupStep, IdentityCleanup},
    deploy::DeployStep,
    error::StepError,
    integration::{TestInvocation, TestStep},
    process::CommandRunner,
    register::{Backoff, CredentialCheck, RegistrationStep},
};

/// The deploy, test and cleanup operations a run is sequenced from.
#[allow(async_fn_in_trait)]
pub trait Steps {
    /// Deploy the slot's release archive to `env`. In unattended mode, also register service
    /// credentials and store them on `env`.
    async fn deploy(
        &self,
        slot: &BuildSlot,
        env: &mut DeployedEnvironment,
        unattended: bool,
    ) -> Result<(), StepError>;

    async fn test(
        &self,
        invocation: &TestInvocation<'_>,
        env: &DeployedEnvironment,
    ) -> Result<(), StepError>;

    async fn cleanup(&self, instance: &str, skip: bool) -> Vec<CleanupWarning>;
}

/// Steps implemented by the external deployment and test tooling.
pub struct ShellSteps<R, C, I> {
    runner: R,
    tooling: Tooling,
    credential_check: Option<C>,
    identity: I,
    backoff: Backoff,
}

impl<R, C, I> ShellSteps<R, C, I> {
    pub fn new(runner: R, tooling: Tooling, credential_check: Option<C>, identity: I) -> Self {
        Self { runner, tooling, credential_check, identity, backoff: Backoff::default() }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl<R, C, I> Steps for ShellSteps<R, C, I>
where
    R: CommandRunner,
    C: CredentialCheck,
    I: IdentityCleanup,
{
    async fn deploy(
        &self,
        slot: &BuildSlot,
        env: &mut DeployedEnvironment,
        unattended: bool,
    ) -> Result<(), StepError> {
        let venv = DeployStep { runner: &self.runner, tooling: &self.tooling }
            .deploy(slot, env)
            .await?;
        if unattended {
            let registration = RegistrationStep {
                runner: &self.runner,
                tooling: &self.tooling,
                check: self.credential_check.as_ref(),
                backoff: self.backoff,
            };
            let credentials = registration.register(env, &venv, &slot.dir).await?;
            env.credentials = Some(credentials);
        }
        Ok(())
    }

    async fn test(
        &self,
        invocation: &TestInvocation<'_>,
        env: &DeployedEnvironment,
    ) -> Result<(), StepError> {
        TestStep { runner: &self.runner, tooling: &self.tooling }.run_tests(invocation, env).await
    }

    async fn cleanup(&self, instance: &str, skip: bool) -> Vec<CleanupWarning> {
        CleanupStep { runner: &self.runner, identity: &self.identity }.cleanup(instance, skip).await
    }
}

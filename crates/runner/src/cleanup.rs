//! Best-effort teardown of an environment's cloud resources.

use std::path::PathBuf;

use check_pr_core::CleanupWarning;

use crate::process::{Cmd, CommandRunner};

/// Deletes identity registrations that belong to the operator.
#[allow(async_fn_in_trait)]
pub trait IdentityCleanup {
    /// Delete the current operator's app registrations whose names contain `name`.
    async fn delete_app_registrations_for_current_user(&self, name: &str) -> Vec<CleanupWarning>;
}

/// Identity cleanup through the `az` CLI.
#[derive(Debug, Clone, Default)]
pub struct AzIdentityCleanup<R> {
    pub runner: R,
}

impl<R: CommandRunner> IdentityCleanup for AzIdentityCleanup<R> {
    async fn delete_app_registrations_for_current_user(&self, name: &str) -> Vec<CleanupWarning> {
        let dir = cleanup_dir();
        let query = format!("[?contains(displayName, '{name}')].appId");
        let list = Cmd::new("listing app registrations", "az", &dir)
            .args(["ad", "app", "list", "--show-mine", "--query", query.as_str(), "-o", "tsv"]);
        let output = match self.runner.output(&list).await {
            Ok(output) => output,
            Err(e) => return vec![CleanupWarning::new("listing app registrations", e)],
        };
        let mut warnings = vec![];
        for app_id in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let delete = Cmd::new(format!("deleting app registration {app_id}"), "az", &dir)
                .args(["ad", "app", "delete", "--id", app_id]);
            if let Err(e) = self.runner.run(&delete).await {
                warnings.push(CleanupWarning::new(delete.stage, e));
            }
        }
        warnings
    }
}

pub struct CleanupStep<'a, R, I> {
    pub runner: &'a R,
    pub identity: &'a I,
}

impl<R: CommandRunner, I: IdentityCleanup> CleanupStep<'_, R, I> {
    /// Delete the resource group named `instance` and its identity registrations, unless
    /// `skip` is set. Failures are returned as warnings since resources may already be gone.
    pub async fn cleanup(&self, instance: &str, skip: bool) -> Vec<CleanupWarning> {
        if skip {
            tracing::info!("Skipping cleanup of {}", instance);
            return vec![];
        }
        let dir = cleanup_dir();
        tracing::info!("Cleaning up {}", instance);
        let mut warnings = vec![];
        let delete = Cmd::new("deleting resource group", "az", &dir)
            .args(["group", "delete", "-n", instance, "--yes", "--no-wait"]);
        if let Err(e) = self.runner.run(&delete).await {
            warnings.push(CleanupWarning::new(delete.stage, e));
        }
        warnings.extend(self.identity.delete_app_registrations_for_current_user(instance).await);
        tracing::info!("Cleanup of {} done", instance);
        warnings
    }
}

/// Cleanup commands run outside the run directory so that it can be removed afterwards.
fn cleanup_dir() -> PathBuf { std::env::temp_dir() }

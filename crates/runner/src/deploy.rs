//! Deploys a release archive to a named cloud environment.

use check_pr_core::{
    config::Tooling,
    models::{BuildSlot, DeployedEnvironment},
};

use crate::{
    archive::{extract, find_files},
    error::StepError,
    process::{Cmd, CommandRunner},
    venv::Venv,
};

pub const DEPLOY_VENV: &str = "deploy-venv";
const DEPLOY_SCRIPT: &str = "deploy.py";
const DEPLOY_CONFIG: &str = "config.json";
const REQUIREMENTS: &str = "requirements.txt";

pub struct DeployStep<'a, R> {
    pub runner: &'a R,
    pub tooling: &'a Tooling,
}

impl<R: CommandRunner> DeployStep<'_, R> {
    /// Extract the slot's release archive and the deployment tooling it contains, then run the
    /// deployment. Leaves the extracted files and the deployment environment in the slot
    /// directory and returns the latter.
    pub async fn deploy(
        &self,
        slot: &BuildSlot,
        env: &DeployedEnvironment,
    ) -> Result<Venv, StepError> {
        tracing::info!("Deploying {} to {}", slot.archive.display(), env.instance);
        let dir = slot.dir.as_path();
        let venv = Venv::create(self.runner, &self.tooling.python, dir, DEPLOY_VENV).await?;

        tracing::info!("Extracting release artifacts");
        extract(&slot.archive, dir).await?;
        let prefix = &self.tooling.deployment_archive_prefix;
        let Some(deployment) = find_files(dir, prefix, ".zip")?.into_iter().next_back() else {
            return Err(StepError::Missing {
                stage: "extracting deployment".to_string(),
                what: format!("{prefix}*.zip"),
                dir: dir.to_path_buf(),
            });
        };
        tracing::info!("Extracting deployment {}", deployment.display());
        extract(&deployment, dir).await?;

        self.runner.run(&venv.pip_install("installing wheel", dir, ["wheel"])).await?;
        self.runner
            .run(&venv.pip_install("installing prereqs", dir, ["-r", REQUIREMENTS]))
            .await?;

        let mut cmd = Cmd::new("running deployment", &venv.python, dir)
            .arg(DEPLOY_SCRIPT)
            .args([env.region.as_str(), env.instance.as_str(), env.instance.as_str(), "cicd"])
            .arg(dir.join(DEPLOY_CONFIG));
        if let Some(subscription_id) = &env.subscription_id {
            cmd = cmd.args(["--subscription_id", subscription_id.as_str()]);
        }
        self.runner.run(&cmd).await?;
        Ok(venv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{archive::testing::write_zip, process::testing::RecordingRunner};

    fn slot_with_release(root: &std::path::Path) -> BuildSlot {
        let slot = BuildSlot::create(root, BuildSlot::TARGET).unwrap();
        let deployment = root.join("onefuzz-deployment-1.0.zip");
        write_zip(&deployment, &[
            ("deploy.py", b"".as_slice()),
            ("requirements.txt", b"".as_slice()),
        ]);
        let deployment = std::fs::read(&deployment).unwrap();
        write_zip(&slot.archive, &[
            ("onefuzz-deployment-1.0.zip", deployment.as_slice()),
            ("sdk/onefuzz-1.0-py3-none-any.whl", b"".as_slice()),
        ]);
        slot
    }

    #[tokio::test]
    async fn test_deploy_sequence() {
        let root = tempfile::tempdir().unwrap();
        let slot = slot_with_release(root.path());
        let runner = RecordingRunner::new();
        let tooling = Tooling::default();
        let env = DeployedEnvironment::new("pr-check-x", "eastus2", Some("sub-1".to_string()));

        let step = DeployStep { runner: &runner, tooling: &tooling };
        let venv = step.deploy(&slot, &env).await.unwrap();

        assert_eq!(runner.stages(), vec![
            "creating deploy-venv",
            "installing wheel",
            "installing prereqs",
            "running deployment",
        ]);
        assert!(slot.dir.join("deploy.py").is_file());
        assert!(slot.dir.join("sdk").join("onefuzz-1.0-py3-none-any.whl").is_file());

        let cmd = runner.find("running deployment");
        assert_eq!(cmd.program, venv.python.clone().into_os_string());
        assert_eq!(cmd.dir, slot.dir);
        let config = slot.dir.join("config.json").to_string_lossy().into_owned();
        assert_eq!(cmd.argv(), vec![
            "deploy.py",
            "eastus2",
            "pr-check-x",
            "pr-check-x",
            "cicd",
            config.as_str(),
            "--subscription_id",
            "sub-1",
        ]);
    }

    #[tokio::test]
    async fn test_deploy_requires_deployment_archive() {
        let root = tempfile::tempdir().unwrap();
        let slot = BuildSlot::create(root.path(), BuildSlot::TARGET).unwrap();
        write_zip(&slot.archive, &[("sdk/onefuzz-1.0-py3-none-any.whl", b"".as_slice())]);
        let runner = RecordingRunner::new();
        let tooling = Tooling::default();
        let env = DeployedEnvironment::new("pr-check-x", "eastus2", None);

        let err = DeployStep { runner: &runner, tooling: &tooling }
            .deploy(&slot, &env)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Missing { .. }));
        assert!(!runner.stages().contains(&"running deployment".to_string()));
    }

    #[tokio::test]
    async fn test_deploy_stops_at_failing_command() {
        let root = tempfile::tempdir().unwrap();
        let slot = slot_with_release(root.path());
        let runner = RecordingRunner::new().failing("installing prereqs");
        let tooling = Tooling::default();
        let env = DeployedEnvironment::new("pr-check-x", "eastus2", None);

        let err = DeployStep { runner: &runner, tooling: &tooling }
            .deploy(&slot, &env)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Exit { code: Some(1), .. }));
        assert_eq!(runner.stages().last().map(String::as_str), Some("installing prereqs"));
    }
}

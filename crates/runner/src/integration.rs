//! Runs the integration test suite against a deployed environment.

use std::path::Path;

use check_pr_core::{
    config::Tooling,
    models::{DeployedEnvironment, TestRun},
};

use crate::{
    archive::{extract, find_files},
    error::StepError,
    process::{Cmd, CommandRunner},
    venv::Venv,
};

pub const TEST_VENV: &str = "test-venv";
pub const TEST_DIR: &str = "integration-test-artifacts";
const TEST_SCRIPT: &str = "integration-test.py";

/// One pass of the integration tests.
#[derive(Debug, Clone, Copy)]
pub struct TestInvocation<'a> {
    pub test_run: &'a TestRun,
    /// Label of the build slot whose published package is installed.
    pub build_label: &'a str,
    pub check_results: bool,
    pub is_first_run: bool,
    /// The integration-test archive.
    pub artifact: &'a Path,
    /// The run root, which holds the test archive and the build slots.
    pub root: &'a Path,
    pub region: &'a str,
    pub authority: Option<&'a str>,
    /// Passed through to the test tool verbatim.
    pub extra_args: &'a [String],
}

pub struct TestStep<'a, R> {
    pub runner: &'a R,
    pub tooling: &'a Tooling,
}

impl<R: CommandRunner> TestStep<'_, R> {
    pub async fn run_tests(
        &self,
        invocation: &TestInvocation<'_>,
        env: &DeployedEnvironment,
    ) -> Result<(), StepError> {
        let root = invocation.root;
        let test_dir = root.join(TEST_DIR);
        tracing::info!(
            "Testing build {} on {} (test id {})",
            invocation.build_label,
            env.instance,
            invocation.test_run
        );

        tracing::info!("Extracting {}", TEST_DIR);
        extract(invocation.artifact, &test_dir).await?;
        let venv = Venv::create(self.runner, &self.tooling.python, root, TEST_VENV).await?;
        self.runner.run(&venv.pip_install("installing wheel", root, ["wheel"])).await?;

        let sdk_dir = root.join(invocation.build_label).join("sdk");
        let wheels = find_files(&sdk_dir, "", ".whl")?;
        if wheels.is_empty() {
            return Err(StepError::Missing {
                stage: "installing sdk".to_string(),
                what: "*.whl".to_string(),
                dir: sdk_dir,
            });
        }
        self.runner.run(&venv.pip_install("installing sdk", root, &wheels)).await?;

        let mut cmd = Cmd::new("running integration", &venv.python, root)
            .arg(test_dir.join(TEST_SCRIPT))
            .arg("test")
            .arg(&test_dir)
            .args(["--region", invocation.region])
            .arg("--endpoint")
            .arg(env.endpoint(&self.tooling.endpoint_domain))
            .arg("--test_id")
            .arg(invocation.test_run.to_string())
            .args(["--build_id", invocation.build_label]);
        if invocation.check_results {
            cmd = cmd.arg("--check_results");
        }
        if invocation.is_first_run {
            cmd = cmd.arg("--is_first_run");
        }
        cmd = cmd.arg("--targets").args(&self.tooling.test_targets);
        if let Some(authority) = invocation.authority {
            cmd = cmd.args(["--authority", authority]);
        }
        if let Some(credentials) = &env.credentials {
            cmd = cmd
                .args(["--client_id", credentials.client_id.as_str(), "--client_secret"])
                .secret_arg(&credentials.client_secret);
        }
        cmd = cmd.args(invocation.extra_args);
        self.runner.run(&cmd).await
    }
}

#[cfg(test)]
mod tests {
    use check_pr_core::models::{BuildSlot, Credentials};

    use super::*;
    use crate::{archive::testing::write_zip, process::testing::RecordingRunner};

    struct Fixture {
        root: tempfile::TempDir,
        artifact: std::path::PathBuf,
        test_run: TestRun,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let artifact = root.path().join("integration-test-artifacts.zip");
        write_zip(&artifact, &[("integration-test.py", b"".as_slice())]);
        for label in [BuildSlot::UPGRADE_FROM, BuildSlot::TARGET] {
            let sdk = root.path().join(label).join("sdk");
            std::fs::create_dir_all(&sdk).unwrap();
            std::fs::write(sdk.join(format!("onefuzz-{label}.0-py3-none-any.whl")), "").unwrap();
        }
        Fixture { root, artifact, test_run: TestRun::new() }
    }

    fn invocation<'a>(f: &'a Fixture, label: &'a str) -> TestInvocation<'a> {
        TestInvocation {
            test_run: &f.test_run,
            build_label: label,
            check_results: true,
            is_first_run: false,
            artifact: &f.artifact,
            root: f.root.path(),
            region: "eastus2",
            authority: None,
            extra_args: &[],
        }
    }

    #[tokio::test]
    async fn test_run_tests() {
        let f = fixture();
        let runner = RecordingRunner::new();
        let tooling = Tooling::default();
        let env = DeployedEnvironment::new("pr-check-x", "eastus2", None);
        let step = TestStep { runner: &runner, tooling: &tooling };

        step.run_tests(&invocation(&f, BuildSlot::TARGET), &env).await.unwrap();
        assert!(f.root.path().join(TEST_DIR).join("integration-test.py").is_file());
        assert_eq!(runner.stages(), vec![
            "creating test-venv",
            "installing wheel",
            "installing sdk",
            "running integration",
        ]);

        let sdk = runner.find("installing sdk");
        let wheel = f.root.path().join("1").join("sdk").join("onefuzz-1.0-py3-none-any.whl");
        assert_eq!(sdk.argv(), vec![
            "install".to_string(),
            "-q".to_string(),
            wheel.to_string_lossy().into_owned(),
        ]);

        let cmd = runner.find("running integration");
        let test_dir = f.root.path().join(TEST_DIR);
        let test_id = f.test_run.to_string();
        assert_eq!(cmd.argv(), vec![
            test_dir.join("integration-test.py").to_string_lossy().into_owned(),
            "test".to_string(),
            test_dir.to_string_lossy().into_owned(),
            "--region".to_string(),
            "eastus2".to_string(),
            "--endpoint".to_string(),
            "https://pr-check-x.azurewebsites.net".to_string(),
            "--test_id".to_string(),
            test_id,
            "--build_id".to_string(),
            "1".to_string(),
            "--check_results".to_string(),
            "--targets".to_string(),
            "windows-onefuzz-sample".to_string(),
        ]);
    }

    #[tokio::test]
    async fn test_run_tests_flags() {
        let f = fixture();
        let runner = RecordingRunner::new();
        let tooling = Tooling::default();
        let mut env = DeployedEnvironment::new("pr-check-x", "eastus2", None);
        env.credentials =
            Some(Credentials { client_id: "a".to_string(), client_secret: "b".to_string() });
        let extra = vec!["--skip_cleanup".to_string()];
        let invocation = TestInvocation {
            check_results: false,
            is_first_run: true,
            authority: Some("https://login.microsoftonline.com/tenant"),
            extra_args: &extra,
            ..invocation(&f, BuildSlot::UPGRADE_FROM)
        };
        TestStep { runner: &runner, tooling: &tooling }.run_tests(&invocation, &env).await.unwrap();

        let cmd = runner.find("running integration");
        let argv = cmd.argv();
        let tail = &argv[argv.iter().position(|a| a == "--build_id").unwrap()..];
        assert_eq!(tail, [
            "--build_id",
            "0",
            "--is_first_run",
            "--targets",
            "windows-onefuzz-sample",
            "--authority",
            "https://login.microsoftonline.com/tenant",
            "--client_id",
            "a",
            "--client_secret",
            "b",
            "--skip_cleanup",
        ]);
        assert!(!cmd.redacted().contains(" b "));
        assert!(cmd.redacted().contains("--client_secret <redacted>"));
    }

    #[tokio::test]
    async fn test_run_tests_requires_sdk() {
        let f = fixture();
        std::fs::remove_dir_all(f.root.path().join("1")).unwrap();
        let runner = RecordingRunner::new();
        let tooling = Tooling::default();
        let env = DeployedEnvironment::new("pr-check-x", "eastus2", None);

        let err = TestStep { runner: &runner, tooling: &tooling }
            .run_tests(&invocation(&f, BuildSlot::TARGET), &env)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Io { .. }));
        assert!(!runner.stages().contains(&"running integration".to_string()));
    }

    #[tokio::test]
    async fn test_run_tests_failure() {
        let f = fixture();
        let runner = RecordingRunner::new().failing("running integration");
        let tooling = Tooling::default();
        let env = DeployedEnvironment::new("pr-check-x", "eastus2", None);

        let err = TestStep { runner: &runner, tooling: &tooling }
            .run_tests(&invocation(&f, BuildSlot::TARGET), &env)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Exit { code: Some(1), .. }));
        assert!(err.to_string().starts_with("running integration: "));
    }
}

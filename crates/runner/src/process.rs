//! External command execution. Every command runs to completion before the next one starts.

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use tokio::process::Command;

use crate::error::StepError;

/// A command to run in an explicit working directory.
#[derive(Debug, Clone)]
pub struct Cmd {
    /// Human-readable description, logged before the command runs.
    pub stage: String,
    pub program: OsString,
    pub args: Vec<OsString>,
    pub dir: PathBuf,
    secrets: Vec<usize>,
}

impl Cmd {
    pub fn new(stage: impl Into<String>, program: impl AsRef<OsStr>, dir: &Path) -> Self {
        Self {
            stage: stage.into(),
            program: program.as_ref().to_os_string(),
            args: vec![],
            dir: dir.to_path_buf(),
            secrets: vec![],
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// An argument that is passed through but never logged.
    pub fn secret_arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.secrets.push(self.args.len());
        self.arg(arg)
    }

    pub fn program_name(&self) -> String { self.program.to_string_lossy().into_owned() }

    /// Arguments as strings, secrets included.
    pub fn argv(&self) -> Vec<String> {
        self.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    /// The command line with secret arguments redacted.
    pub fn redacted(&self) -> String {
        let mut out = self.program_name();
        for (i, arg) in self.args.iter().enumerate() {
            out.push(' ');
            if self.secrets.contains(&i) {
                out.push_str("<redacted>");
            } else {
                out.push_str(&arg.to_string_lossy());
            }
        }
        out
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).current_dir(&self.dir).kill_on_drop(true);
        command
    }

    fn check(&self, status: ExitStatus) -> Result<(), StepError> {
        if status.success() {
            Ok(())
        } else {
            Err(StepError::Exit {
                stage: self.stage.clone(),
                program: self.program_name(),
                code: status.code(),
            })
        }
    }

    fn spawn_error(&self, source: std::io::Error) -> StepError {
        StepError::Spawn { stage: self.stage.clone(), program: self.program_name(), source }
    }
}

#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a command, streaming its output to ours. A nonzero exit is an error.
    async fn run(&self, cmd: &Cmd) -> Result<(), StepError>;

    /// Run a command and capture its standard output. A nonzero exit is an error.
    async fn output(&self, cmd: &Cmd) -> Result<String, StepError>;
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &Cmd) -> Result<(), StepError> {
        tracing::info!("{}", cmd.stage);
        tracing::debug!("{} (in {})", cmd.redacted(), cmd.dir.display());
        let status = cmd.command().status().await.map_err(|e| cmd.spawn_error(e))?;
        cmd.check(status)
    }

    async fn output(&self, cmd: &Cmd) -> Result<String, StepError> {
        tracing::info!("{}", cmd.stage);
        tracing::debug!("{} (in {})", cmd.redacted(), cmd.dir.display());
        let output = cmd
            .command()
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|e| cmd.spawn_error(e))?;
        cmd.check(output.status)?;
        String::from_utf8(output.stdout).map_err(|_| StepError::InvalidOutput {
            stage: cmd.stage.clone(),
            program: cmd.program_name(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted() {
        let cmd = Cmd::new("running", "python", Path::new("/tmp"))
            .args(["--client_id", "abc", "--client_secret"])
            .secret_arg("hunter2");
        assert_eq!(cmd.redacted(), "python --client_id abc --client_secret <redacted>");
        assert_eq!(cmd.argv().last().map(String::as_str), Some("hunter2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SystemRunner;
        let output = runner.output(&Cmd::new("printing", "pwd", dir.path())).await.unwrap();
        assert_eq!(
            std::fs::canonicalize(output.trim()).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );

        let err = runner.run(&Cmd::new("failing", "false", dir.path())).await.unwrap_err();
        assert!(matches!(err, StepError::Exit { code: Some(1), .. }));

        let err = runner
            .run(&Cmd::new("missing", "check-pr-definitely-missing", dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Spawn { .. }));
    }
}

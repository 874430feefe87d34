//! Isolated Python runtime environments for the deployment and test tooling.

use std::path::{Path, PathBuf};

use crate::{
    error::StepError,
    process::{Cmd, CommandRunner},
};

/// Locate an executable inside a virtual environment.
pub fn venv_path(base: &Path, name: &str) -> Result<PathBuf, StepError> {
    for subdir in ["bin", "Scripts"] {
        for ext in ["", ".exe"] {
            let path = base.join(subdir).join(format!("{name}{ext}"));
            if path.exists() {
                return Ok(path);
            }
        }
    }
    Err(StepError::Missing {
        stage: "locating virtual environment".to_string(),
        what: format!("{name} executable"),
        dir: base.to_path_buf(),
    })
}

#[derive(Debug, Clone)]
pub struct Venv {
    pub pip: PathBuf,
    pub python: PathBuf,
}

impl Venv {
    /// Create (or reuse) the environment `dir/name` with the interpreter `python`.
    pub async fn create<R: CommandRunner>(
        runner: &R,
        python: &str,
        dir: &Path,
        name: &str,
    ) -> Result<Self, StepError> {
        let cmd = Cmd::new(format!("creating {name}"), python, dir).args(["-m", "venv", name]);
        runner.run(&cmd).await?;
        Self::open(&dir.join(name))
    }

    pub fn open(base: &Path) -> Result<Self, StepError> {
        Ok(Self { pip: venv_path(base, "pip")?, python: venv_path(base, "python")? })
    }

    /// `pip install -q <args>`
    pub fn pip_install<I, S>(&self, stage: &str, dir: &Path, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        Cmd::new(stage, &self.pip, dir).args(["install", "-q"]).args(args)
    }
}

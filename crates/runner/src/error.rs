use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Failure of a deploy or test step. Steps abort on the first failing command.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{stage}: failed to start {program}")]
    Spawn {
        stage: String,
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{stage}: {program} {}", ExitCode(.code))]
    Exit { stage: String, program: String, code: Option<i32> },
    #[error("{stage}: output of {program} is not valid UTF-8")]
    InvalidOutput { stage: String, program: String },
    #[error("{stage}: no {what} found in {}", .dir.display())]
    Missing { stage: String, what: String, dir: PathBuf },
    #[error("failed to extract {}", .archive.display())]
    Extract {
        archive: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("registration of {name} failed")]
    Registration {
        name: String,
        #[source]
        source: RegistrationError,
    },
    #[error("credentials for {name} not usable after {attempts} attempts: {last_error}")]
    CredentialsNotReady { name: String, attempts: u32, last_error: String },
}

impl StepError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("registration output is missing {0}")]
    MissingField(&'static str),
    #[error("no active subscription found")]
    NoSubscription,
}

struct ExitCode<'a>(&'a Option<i32>);

impl fmt::Display for ExitCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self.0 {
            Some(code) => write!(f, "exited with code {code}"),
            None => f.write_str("was terminated by a signal"),
        }
    }
}

/// Render an error followed by its chain of sources, `outer: inner: root`.
pub fn display_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(e) = source {
        out.push_str(": ");
        out.push_str(&e.to_string());
        source = e.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_display() {
        let e = StepError::Exit {
            stage: "running deployment".to_string(),
            program: "python".to_string(),
            code: Some(2),
        };
        assert_eq!(e.to_string(), "running deployment: python exited with code 2");
        let e = StepError::Exit {
            stage: "running deployment".to_string(),
            program: "python".to_string(),
            code: None,
        };
        assert_eq!(e.to_string(), "running deployment: python was terminated by a signal");
    }

    #[test]
    fn test_display_chain() {
        let e = StepError::Registration {
            name: "sp_x".to_string(),
            source: RegistrationError::MissingField("client_secret"),
        };
        assert_eq!(
            display_chain(&e),
            "registration of sp_x failed: registration output is missing client_secret"
        );
    }
}

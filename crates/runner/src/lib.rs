pub mod archive;
pub mod cleanup;
pub mod deploy;
pub mod error;
pub mod gate;
pub mod integration;
pub mod orchestrator;
pub mod process;
pub mod register;
pub mod steps;
pub mod venv;

pub use error::{RegistrationError, StepError};
pub use orchestrator::{Orchestrator, RunError, RunOutcome, RunReport};
pub use steps::{ShellSteps, Steps};

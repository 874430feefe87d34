pub mod config;
pub mod error;
pub mod models;
pub mod naming;
pub mod source;

pub use error::{CleanupWarning, ConfigError, FetchError};

use std::{
    fmt,
    path::{Path, PathBuf},
};

use uuid::Uuid;

/// A labeled working directory holding one downloaded release artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSlot {
    pub label: &'static str,
    pub dir: PathBuf,
    pub archive: PathBuf,
}

impl BuildSlot {
    /// The build deployed first and upgraded from.
    pub const UPGRADE_FROM: &'static str = "0";
    /// The build under validation.
    pub const TARGET: &'static str = "1";

    /// Create the slot directory under the run root.
    pub fn create(root: &Path, label: &'static str) -> std::io::Result<Self> {
        let dir = root.join(label);
        std::fs::create_dir(&dir)?;
        let archive_name = match label {
            Self::TARGET => "release-artifacts.zip".to_string(),
            label => format!("release-artifacts-{label}.zip"),
        };
        let archive = dir.join(archive_name);
        Ok(Self { label, dir, archive })
    }
}

/// Identifier shared by every test pass of a run so that test telemetry can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestRun {
    pub id: Uuid,
}

impl TestRun {
    pub fn new() -> Self { Self { id: Uuid::new_v4() } }
}

impl Default for TestRun {
    fn default() -> Self { Self::new() }
}

impl fmt::Display for TestRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(&self.id, f) }
}

/// Service credentials created for an environment in unattended mode.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// A live cloud environment, identified by instance name and region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedEnvironment {
    pub instance: String,
    pub region: String,
    pub subscription_id: Option<String>,
    /// Populated by registration in unattended mode.
    pub credentials: Option<Credentials>,
}

impl DeployedEnvironment {
    pub fn new(instance: &str, region: &str, subscription_id: Option<String>) -> Self {
        Self {
            instance: instance.to_string(),
            region: region.to_string(),
            subscription_id,
            credentials: None,
        }
    }

    pub fn endpoint(&self, domain: &str) -> String { format!("https://{}.{}", self.instance, domain) }

    /// Name of the service credential registered for this environment.
    pub fn registration_name(&self) -> String { format!("sp_{}", self.instance) }
}

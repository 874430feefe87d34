//! The collaborator that supplies build artifacts and merges change requests.

use std::path::Path;

use crate::{config::Target, error::FetchError};

/// A named artifact produced by a workflow for a target change.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactRequest<'a> {
    pub target: &'a Target,
    pub workflow: &'a str,
    pub name: &'a str,
}

#[allow(async_fn_in_trait)]
pub trait ArtifactSource {
    /// Download the artifact described by `request` to `dest`.
    async fn fetch_artifact(
        &self,
        request: ArtifactRequest<'_>,
        dest: &Path,
    ) -> Result<(), FetchError>;

    /// Merge the change request behind `target`.
    async fn merge_change_request(&self, target: &Target) -> anyhow::Result<()>;
}

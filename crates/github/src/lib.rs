//! GitHub-backed artifact source: locates workflow runs for a branch or pull request,
//! downloads named artifacts and merges pull requests.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use check_pr_core::{
    FetchError,
    config::{ChangeRef, GitHubConfig, Target},
    source::{ArtifactRequest, ArtifactSource},
};
use http::StatusCode;
use octocrab::{
    GitHubError, Octocrab,
    models::workflows::Run,
    params::{actions::ArchiveFormat, pulls::MergeMethod},
};

/// How many pages of workflow runs to scan before giving up.
const MAX_RUN_PAGES: u32 = 5;
const RUNS_PER_PAGE: u8 = 50;

#[derive(Clone)]
pub struct GitHub {
    pub client: Octocrab,
}

impl GitHub {
    pub async fn new(config: &GitHubConfig) -> Result<Self> {
        let mut builder = Octocrab::builder();
        if let Some(token) = &config.token {
            builder = builder.personal_token(token.clone());
        }
        let client = builder.build().context("Failed to create GitHub client")?;
        if config.token.is_some() {
            let profile = client.current().user().await.context("Failed to fetch current user")?;
            tracing::info!("Logged in as {}", profile.login);
        } else {
            tracing::warn!("No GitHub token configured, using anonymous access");
        }
        Ok(Self { client })
    }

    /// Find the most recent successful run of `workflow` that built `target`.
    async fn find_run(
        &self,
        owner: &str,
        repo: &str,
        workflow: &str,
        target: &Target,
    ) -> Result<Run, FetchError> {
        let (branch, head_sha) = match &target.change {
            ChangeRef::Branch(branch) => (branch.clone(), None),
            ChangeRef::PullRequest(number) => {
                let pull_request = match self.client.pulls(owner, repo).get(*number).await {
                    Ok(pull_request) => pull_request,
                    Err(e) if is_not_found(&e) => {
                        return Err(FetchError::PullRequestNotFound {
                            repo: target.repo.clone(),
                            number: *number,
                        });
                    }
                    Err(e) => {
                        return Err(anyhow!(e)
                            .context(format!("Failed to fetch pull request {number}"))
                            .into());
                    }
                };
                (pull_request.head.ref_field.clone(), Some(pull_request.head.sha.clone()))
            }
        };
        tracing::debug!(
            "Looking for {} runs of {}/{} on {} ({})",
            workflow,
            owner,
            repo,
            branch,
            head_sha.as_deref().unwrap_or("latest")
        );
        for page in 1..=MAX_RUN_PAGES {
            let result = self
                .client
                .workflows(owner, repo)
                .list_runs(workflow)
                .branch(branch.as_str())
                .status("success")
                .per_page(RUNS_PER_PAGE)
                .page(page)
                .send()
                .await;
            let items = match result {
                Ok(result) if result.items.is_empty() => break,
                Ok(result) => result.items,
                Err(e) if is_not_found(&e) => break,
                Err(e) => {
                    return Err(anyhow!(e)
                        .context(format!("Failed to fetch workflow runs page {page}"))
                        .into());
                }
            };
            let found = match &head_sha {
                Some(sha) => items.into_iter().find(|run| &run.head_sha == sha),
                None => items.into_iter().next(),
            };
            if let Some(run) = found {
                return Ok(run);
            }
        }
        Err(FetchError::RunNotFound { workflow: workflow.to_string(), target: target.to_string() })
    }
}

impl ArtifactSource for GitHub {
    async fn fetch_artifact(
        &self,
        request: ArtifactRequest<'_>,
        dest: &Path,
    ) -> Result<(), FetchError> {
        let (owner, repo) = split_repo(&request.target.repo)?;
        let run = self.find_run(owner, repo, request.workflow, request.target).await?;
        tracing::info!(
            "Fetching {} from {} run {} ({})",
            request.name,
            request.target,
            run.id,
            run.head_sha
        );
        let artifacts = self
            .client
            .all_pages(
                self.client
                    .actions()
                    .list_workflow_run_artifacts(owner, repo, run.id)
                    .send()
                    .await
                    .context("Failed to fetch artifacts")?
                    .value
                    .unwrap_or_default(),
            )
            .await
            .context("Failed to fetch artifacts")?;
        let artifact = artifacts.into_iter().find(|a| a.name == request.name).ok_or_else(|| {
            FetchError::ArtifactNotFound {
                repo: request.target.repo.clone(),
                name: request.name.to_string(),
                run_id: run.id.into_inner(),
            }
        })?;
        if artifact.expired {
            return Err(FetchError::ArtifactExpired {
                repo: request.target.repo.clone(),
                name: request.name.to_string(),
                run_id: run.id.into_inner(),
            });
        }
        let bytes = self
            .client
            .actions()
            .download_artifact(owner, repo, artifact.id, ArchiveFormat::Zip)
            .await
            .with_context(|| format!("Failed to download artifact {}", request.name))?;
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|source| FetchError::Write { path: dest.to_path_buf(), source })?;
        tracing::info!("Downloaded {} ({} bytes) to {}", request.name, bytes.len(), dest.display());
        Ok(())
    }

    async fn merge_change_request(&self, target: &Target) -> Result<()> {
        let ChangeRef::PullRequest(number) = target.change else {
            tracing::info!("Nothing to merge for {}", target);
            return Ok(());
        };
        let (owner, repo) = split_repo(&target.repo)?;
        tracing::info!("Merging {}/{}#{}", owner, repo, number);
        let result = self
            .client
            .pulls(owner, repo)
            .merge(number)
            .method(MergeMethod::Squash)
            .send()
            .await
            .with_context(|| format!("Failed to merge {}#{}", target.repo, number))?;
        if !result.merged {
            bail!(
                "Pull request {}#{} was not merged: {}",
                target.repo,
                number,
                result.message.as_deref().unwrap_or("no reason given")
            );
        }
        tracing::info!(
            "Merged {}#{} ({})",
            target.repo,
            number,
            result.sha.as_deref().unwrap_or("unknown sha")
        );
        Ok(())
    }
}

fn is_not_found(e: &octocrab::Error) -> bool {
    matches!(e, octocrab::Error::GitHub { source, .. }
        if matches!(**source, GitHubError { status_code: StatusCode::NOT_FOUND, .. }))
}

/// Split a validated `owner/name` into its owner and name.
pub fn split_repo(repo: &str) -> Result<(&str, &str)> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => Ok((owner, name)),
        _ => Err(anyhow!("Invalid repository '{}'", repo)),
    }
}

//! Service credential registration for unattended runs.
//!
//! Newly registered credentials propagate to the identity backend eventually, so registration
//! only returns once the credentials have been observed to work (or, without a way to check
//! them, once a fixed settle delay has elapsed).

use std::{path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use check_pr_core::{
    config::Tooling,
    models::{Credentials, DeployedEnvironment},
};
use serde::Deserialize;
use tokio::time::sleep;

use crate::{
    error::{RegistrationError, StepError},
    process::{Cmd, CommandRunner},
    venv::Venv,
};

const REGISTRATION_SCRIPT: &str = "deploylib/registration.py";
const REQUIREMENTS: &str = "requirements.txt";

/// Exponential backoff for polling credential validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub attempts: u32,
    pub base: Duration,
}

impl Default for Backoff {
    fn default() -> Self { Self { attempts: 6, base: Duration::from_secs(1) } }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration { self.base * (1u32 << attempt.min(10)) }
}

/// Checks whether freshly registered credentials are usable yet.
#[allow(async_fn_in_trait)]
pub trait CredentialCheck {
    async fn check(&self, credentials: &Credentials) -> Result<()>;
}

/// Requests an access token with the client-credentials grant from the configured authority.
#[derive(Clone)]
pub struct TokenCheck {
    client: reqwest::Client,
    authority: String,
    scope: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl TokenCheck {
    pub fn new(authority: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            authority: authority.trim_end_matches('/').to_string(),
            scope: "https://graph.microsoft.com/.default".to_string(),
        }
    }
}

impl CredentialCheck for TokenCheck {
    async fn check(&self, credentials: &Credentials) -> Result<()> {
        let url = format!("{}/oauth2/v2.0/token", self.authority);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("Failed to request token from {}", self.authority))?;
        let status = response.status();
        if !status.is_success() {
            bail!("Token request to {} failed with {}", self.authority, status);
        }
        let token: TokenResponse =
            response.json().await.context("Failed to parse token response")?;
        if token.access_token.is_empty() {
            bail!("Token response from {} contained no token", self.authority);
        }
        Ok(())
    }
}

pub struct RegistrationStep<'a, R, C> {
    pub runner: &'a R,
    pub tooling: &'a Tooling,
    pub check: Option<&'a C>,
    pub backoff: Backoff,
}

impl<R: CommandRunner, C: CredentialCheck> RegistrationStep<'_, R, C> {
    /// Register a service credential scoped to `env`, using the deployment tooling extracted
    /// into `dir`. Returns once the credential is usable.
    pub async fn register(
        &self,
        env: &DeployedEnvironment,
        venv: &Venv,
        dir: &Path,
    ) -> Result<Credentials, StepError> {
        let name = env.registration_name();
        tracing::info!("Registering {} to {}", name, env.instance);
        let registration_err =
            |source| StepError::Registration { name: name.clone(), source };

        let subscription_id = self
            .runner
            .output(
                &Cmd::new("querying subscription", "az", dir)
                    .args(["account", "show", "--query", "id", "-o", "tsv"]),
            )
            .await?
            .trim()
            .to_string();
        if subscription_id.is_empty() {
            return Err(registration_err(RegistrationError::NoSubscription));
        }

        self.runner.run(&venv.pip_install("installing prereqs", dir, ["-r", REQUIREMENTS])).await?;
        let output = self
            .runner
            .output(
                &Cmd::new("running cli registration", &venv.python, dir)
                    .args([REGISTRATION_SCRIPT, "create_cli_registration"])
                    .args([env.instance.as_str(), subscription_id.as_str()])
                    .args(["--registration_name", name.as_str()]),
            )
            .await?;
        let credentials = parse_registration_output(&output).map_err(registration_err)?;
        tracing::info!("Registered client_id: {}", credentials.client_id);

        match self.check {
            Some(check) => wait_until_usable(check, &credentials, self.backoff, &name).await?,
            None => {
                tracing::info!(
                    "Waiting {}s for {} to propagate",
                    self.tooling.settle_delay.as_secs(),
                    name
                );
                sleep(self.tooling.settle_delay).await;
            }
        }
        Ok(credentials)
    }
}

/// Poll `check` with exponential backoff until it accepts `credentials`.
pub async fn wait_until_usable<C: CredentialCheck>(
    check: &C,
    credentials: &Credentials,
    backoff: Backoff,
    name: &str,
) -> Result<(), StepError> {
    let mut attempt = 0;
    loop {
        match check.check(credentials).await {
            Ok(()) => {
                tracing::info!("Credentials for {} are usable", name);
                return Ok(());
            }
            Err(e) => {
                attempt += 1;
                if attempt >= backoff.attempts {
                    return Err(StepError::CredentialsNotReady {
                        name: name.to_string(),
                        attempts: attempt,
                        last_error: format!("{e:#}"),
                    });
                }
                tracing::info!(
                    "Credentials for {} not usable yet, retrying (attempt {}/{})",
                    name,
                    attempt,
                    backoff.attempts
                );
                sleep(backoff.delay(attempt)).await;
            }
        }
    }
}

/// Pull `client_id` and `client_secret` out of the registration tool's `key: value` output.
pub fn parse_registration_output(output: &str) -> Result<Credentials, RegistrationError> {
    let mut client_id = None;
    let mut client_secret = None;
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if key.contains("client_secret") {
            client_secret = Some(value.to_string());
        } else if key.contains("client_id") {
            client_id = Some(value.to_string());
        }
    }
    Ok(Credentials {
        client_id: client_id.ok_or(RegistrationError::MissingField("client_id"))?,
        client_secret: client_secret.ok_or(RegistrationError::MissingField("client_secret"))?,
    })
}

//! Trusted range bootstrap.
//!
//! The metadata endpoint that lists webhook source ranges has a tiny
//! anonymous rate limit and refuses application JWTs; it only answers
//! installation tokens. So the bootstrap authenticates as the application,
//! picks its first installation, mints a token for it, and reads the
//! metadata as that installation.
//!
//! Any failure aborts the whole chain; there is no retry. The caller decides
//! the fallback (see `BootstrapFailurePolicy`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

use crate::observability::metrics;
use crate::security::cidr::{parse_ranges, CidrBlock, TrustedRanges};
use crate::upstream::app_auth::AppCredentials;
use crate::upstream::client::{ClientAuth, GithubClient};
use crate::upstream::types::{BootstrapError, BootstrapResult};

/// Fetches the trusted webhook source ranges from the upstream API.
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    credentials: AppCredentials,
    api_url: Url,
    timeout: Duration,
    user_agent: String,
}

impl Bootstrapper {
    pub fn new(
        credentials: AppCredentials,
        api_url: &str,
        timeout: Duration,
        user_agent: impl Into<String>,
    ) -> BootstrapResult<Self> {
        let api_url =
            Url::parse(api_url).map_err(|_| BootstrapError::InvalidUrl(api_url.to_string()))?;
        Ok(Self {
            credentials,
            api_url,
            timeout,
            user_agent: user_agent.into(),
        })
    }

    /// Run the credential exchange and return the parsed trusted ranges.
    ///
    /// Malformed range strings are skipped; everything else that goes wrong
    /// fails the call.
    pub async fn fetch_trusted_ranges(&self) -> BootstrapResult<Vec<CidrBlock>> {
        // 1. Authenticate as the application
        let jwt = self.credentials.app_jwt()?;
        let app_client = self.client(&ClientAuth::App(jwt))?;

        // 2. First installation only
        let installations = app_client.list_installations(1).await?;
        let installation = installations
            .first()
            .ok_or(BootstrapError::NoInstallation)?;
        tracing::debug!(
            app_id = %self.credentials.app_id(),
            installation_id = installation.id,
            "Authenticating as installation"
        );

        // 3. Installation-scoped token
        let token = app_client.create_installation_token(installation.id).await?;

        // 4. Fresh client authenticated as the installation
        let installation_client = self.client(&ClientAuth::Installation(token.token))?;
        let meta = installation_client.meta().await?;

        // 5. Parse, skipping malformed entries
        let ranges = parse_ranges(&meta.hooks);

        let listed: Vec<String> = ranges.iter().map(ToString::to_string).collect();
        tracing::info!(
            trusted_ranges = ?listed,
            skipped = meta.hooks.len() - ranges.len(),
            "CIDRs that can skip rate limiting"
        );

        Ok(ranges)
    }

    fn client(&self, auth: &ClientAuth) -> BootstrapResult<GithubClient> {
        GithubClient::new(&self.api_url, auth, self.timeout, &self.user_agent)
    }
}

/// Re-run the bootstrap every `every` and swap the result into `ranges`.
///
/// A failed refresh, or one that yields no usable range, keeps the current
/// set. The task ends when `shutdown`
/// fires or its sender is dropped.
pub fn spawn_refresh(
    bootstrapper: Arc<Bootstrapper>,
    ranges: TrustedRanges,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately; boot already fetched once
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match bootstrapper.fetch_trusted_ranges().await {
                        Ok(blocks) if blocks.is_empty() => {
                            tracing::warn!(
                                kept = ranges.len(),
                                "Trusted range refresh returned no usable ranges, keeping current set"
                            );
                        }
                        Ok(blocks) => {
                            metrics::record_trusted_ranges(blocks.len());
                            ranges.replace(blocks);
                        }
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                kept = ranges.len(),
                                "Trusted range refresh failed, keeping current set"
                            );
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Trusted range refresh stopped");
                    break;
                }
            }
        }
    })
}

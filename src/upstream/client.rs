//! Upstream REST client with timeout and error handling.
//!
//! # Responsibilities
//! - Authenticate every call with either an application JWT or an
//!   installation token
//! - Call the three endpoints the bootstrap needs
//! - Map transport, status and decoding failures onto `BootstrapError`

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::upstream::types::{
    BootstrapError, BootstrapResult, Installation, InstallationToken, Meta,
};

const API_VERSION: &str = "2022-11-28";

const LIST_INSTALLATIONS: &str = "GET /app/installations";
const CREATE_TOKEN: &str = "POST /app/installations/{id}/access_tokens";
const GET_META: &str = "GET /meta";

/// How a client authenticates.
#[derive(Clone)]
pub enum ClientAuth {
    /// Application-level JWT.
    App(String),
    /// Installation access token.
    Installation(String),
}

impl ClientAuth {
    fn bearer(&self) -> &str {
        match self {
            Self::App(token) | Self::Installation(token) => token,
        }
    }
}

/// Client bound to one API base URL and one credential.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    base: Url,
}

impl GithubClient {
    /// Build a client.
    ///
    /// # Arguments
    /// * `base` - API base URL, e.g. `https://api.github.com`
    /// * `auth` - credential sent on every request
    /// * `timeout` - per-request timeout
    /// * `user_agent` - sent on every request; the API rejects requests without one
    pub fn new(
        base: &Url,
        auth: &ClientAuth,
        timeout: Duration,
        user_agent: &str,
    ) -> BootstrapResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", auth.bearer()))
            .map_err(|_| BootstrapError::Credential("token is not a valid header value".into()))?;
        auth_value.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_value);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| BootstrapError::Http {
                endpoint: "client",
                message: e.to_string(),
            })?;

        // Url::join drops the last path segment unless it ends with '/'
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self { http, base })
    }

    fn url(&self, path: &str) -> BootstrapResult<Url> {
        self.base
            .join(path)
            .map_err(|_| BootstrapError::InvalidUrl(format!("{}{}", self.base, path)))
    }

    /// List the application's installations, first page only.
    pub async fn list_installations(&self, per_page: u8) -> BootstrapResult<Vec<Installation>> {
        let url = self.url("app/installations")?;
        let request = self
            .http
            .get(url)
            .query(&[("per_page", per_page.to_string())]);
        self.send(LIST_INSTALLATIONS, request).await
    }

    /// Exchange the application JWT for an installation access token.
    pub async fn create_installation_token(
        &self,
        installation_id: u64,
    ) -> BootstrapResult<InstallationToken> {
        let url = self.url(&format!("app/installations/{}/access_tokens", installation_id))?;
        self.send(CREATE_TOKEN, self.http.post(url)).await
    }

    /// Fetch the API metadata, which lists the webhook delivery ranges.
    pub async fn meta(&self) -> BootstrapResult<Meta> {
        let url = self.url("meta")?;
        self.send(GET_META, self.http.get(url)).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> BootstrapResult<T> {
        let response = request.send().await.map_err(|e| transport_error(endpoint, &e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BootstrapError::Credential(format!(
                "{} returned HTTP {}",
                endpoint,
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(BootstrapError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                BootstrapError::Timeout { endpoint }
            } else {
                BootstrapError::Decode {
                    endpoint,
                    message: e.to_string(),
                }
            }
        })
    }
}

fn transport_error(endpoint: &'static str, e: &reqwest::Error) -> BootstrapError {
    if e.is_timeout() {
        BootstrapError::Timeout { endpoint }
    } else {
        BootstrapError::Http {
            endpoint,
            message: e.to_string(),
        }
    }
}

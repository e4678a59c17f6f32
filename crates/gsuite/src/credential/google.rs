// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Google OAuth2 provider (authorization code + PKCE, refresh, userinfo).

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credential::{
    AuthorizationRequest, OAuthProvider, ProviderError, TokenErrorResponse, TokenResponse,
};

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_USERINFO_URI: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Token endpoint error codes that mean the grant itself is dead.
const REJECTED_GRANT_ERRORS: &[&str] = &["invalid_grant", "invalid_client", "unauthorized_client"];

/// OAuth client registration, as downloaded from the Google Cloud console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_userinfo_uri")]
    pub userinfo_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_owned()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_owned()
}

fn default_userinfo_uri() -> String {
    DEFAULT_USERINFO_URI.to_owned()
}

/// Console downloads wrap the client in `installed` (desktop) or `web`.
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    #[serde(default)]
    installed: Option<ClientSecrets>,
    #[serde(default)]
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Load the client secrets file (`.gauth.json`).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read client secrets {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid client secrets {}", path.display()))
    }

    pub fn parse(json: &str) -> anyhow::Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(json)?;
        let secrets = file
            .installed
            .or(file.web)
            .ok_or_else(|| anyhow::anyhow!("expected an `installed` or `web` client entry"))?;
        if secrets.client_id.is_empty() {
            anyhow::bail!("client_id is empty");
        }
        Ok(secrets)
    }
}

/// Google implementation of [`OAuthProvider`].
pub struct GoogleProvider {
    secrets: ClientSecrets,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(secrets: ClientSecrets) -> anyhow::Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { secrets, http })
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, ProviderError> {
        let resp = self
            .http
            .post(&self.secrets.token_uri)
            .form(form)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("HTTP error: {e}")))?;

        let status = resp.status();
        let body =
            resp.text().await.map_err(|e| ProviderError::Transient(format!("read body: {e}")))?;

        if !status.is_success() {
            return Err(classify_error(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::Transient(format!("parse token response: {e}")))
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn client_id(&self) -> &str {
        &self.secrets.client_id
    }

    fn token_uri(&self) -> &str {
        &self.secrets.token_uri
    }

    fn authorization_url(&self, request: &AuthorizationRequest<'_>) -> anyhow::Result<String> {
        let scope = request.scopes.join(" ");
        let url = url::Url::parse_with_params(
            &self.secrets.auth_uri,
            &[
                ("client_id", self.secrets.client_id.as_str()),
                ("redirect_uri", request.redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("include_granted_scopes", "true"),
                ("state", request.state),
                ("code_challenge", request.code_challenge),
                ("code_challenge_method", "S256"),
                ("login_hint", request.identity),
            ],
        )
        .with_context(|| format!("invalid auth_uri {}", self.secrets.auth_uri))?;
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, ProviderError> {
        self.post_token(&[
            ("grant_type", "authorization_code"),
            ("client_id", self.secrets.client_id.as_str()),
            ("client_secret", self.secrets.client_secret.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ProviderError> {
        self.post_token(&[
            ("grant_type", "refresh_token"),
            ("client_id", self.secrets.client_id.as_str()),
            ("client_secret", self.secrets.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn userinfo(&self, access_token: &str) -> Result<serde_json::Value, ProviderError> {
        let resp = self
            .http
            .get(&self.secrets.userinfo_uri)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("HTTP error: {e}")))?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Rejected("access token not accepted".to_owned()));
        }
        if !status.is_success() {
            return Err(ProviderError::Transient(format!("userinfo HTTP {status}")));
        }
        resp.json().await.map_err(|e| ProviderError::Transient(format!("parse userinfo: {e}")))
    }
}

/// Map a non-2xx token endpoint response onto [`ProviderError`].
fn classify_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) if REJECTED_GRANT_ERRORS.contains(&err.error.as_str()) => {
            ProviderError::Rejected(err.error_description.unwrap_or(err.error))
        }
        Ok(err) => ProviderError::Transient(format!(
            "{}: {}",
            err.error,
            err.error_description.unwrap_or_default()
        )),
        Err(_) => ProviderError::Transient(format!("HTTP {status}: {body}")),
    }
}

#[cfg(test)]
#[path = "google_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-identity OAuth2 credentials and the provider seam they are minted by.
//!
//! A [`Credential`] is created by the first successful code exchange and is
//! replaced wholesale on every refresh. Providers implement [`OAuthProvider`];
//! the Google implementation lives in [`google`].

pub mod google;
pub mod pkce;
pub mod store;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Scopes requested when the operator does not override them.
pub const DEFAULT_SCOPES: &[&str] = &[
    "openid",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://mail.google.com/",
    "https://www.googleapis.com/auth/calendar",
];

/// Persisted OAuth2 state for one identity.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub identity: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry as milliseconds since Unix epoch. Zero means unknown and is
    /// treated as already expired.
    #[serde(default)]
    pub expires_at_ms: u64,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Client the tokens were issued to.
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub token_uri: String,
}

fn default_token_type() -> String {
    "Bearer".to_owned()
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identity", &self.identity)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at_ms", &self.expires_at_ms)
            .field("scopes", &self.scopes)
            .field("token_type", &self.token_type)
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl Credential {
    /// Build a fresh credential from a code exchange response.
    ///
    /// When the provider omits `scope`, the requested scopes are recorded.
    pub fn from_exchange(
        identity: &str,
        token: TokenResponse,
        requested_scopes: &[String],
        client_id: &str,
        token_uri: &str,
        now_ms: u64,
    ) -> Self {
        let scopes = match token.scope.as_deref() {
            Some(s) => parse_scopes(s),
            None => requested_scopes.iter().cloned().collect(),
        };
        Self {
            identity: identity.to_owned(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at_ms: expiry_from(token.expires_in, now_ms),
            scopes,
            token_type: token.token_type.unwrap_or_else(default_token_type),
            client_id: client_id.to_owned(),
            token_uri: token_uri.to_owned(),
        }
    }

    /// Merge a refresh response into a replacement credential.
    ///
    /// Google rarely rotates refresh tokens, so the stored one is kept unless
    /// a new one is returned. Same for scopes.
    pub fn refreshed(&self, token: TokenResponse, now_ms: u64) -> Self {
        Self {
            identity: self.identity.clone(),
            access_token: token.access_token,
            refresh_token: token.refresh_token.or_else(|| self.refresh_token.clone()),
            expires_at_ms: expiry_from(token.expires_in, now_ms),
            scopes: token.scope.as_deref().map(parse_scopes).unwrap_or_else(|| self.scopes.clone()),
            token_type: token.token_type.unwrap_or_else(|| self.token_type.clone()),
            client_id: self.client_id.clone(),
            token_uri: self.token_uri.clone(),
        }
    }

    /// True when the access token can be used at `now_ms` without refreshing.
    pub fn is_usable(&self, now_ms: u64, skew_ms: u64) -> bool {
        now_ms.saturating_add(skew_ms) < self.expires_at_ms
    }

    /// Seconds until expiry, `None` once expired.
    pub fn expires_in_secs(&self, now_ms: u64) -> Option<u64> {
        if self.expires_at_ms > now_ms {
            Some((self.expires_at_ms - now_ms) / 1000)
        } else {
            None
        }
    }
}

fn expiry_from(expires_in: Option<u64>, now_ms: u64) -> u64 {
    // Google omits expires_in only on malformed responses; assume one hour.
    let secs = expires_in.unwrap_or(3600);
    now_ms.saturating_add(secs.saturating_mul(1000))
}

fn parse_scopes(s: &str) -> BTreeSet<String> {
    s.split_whitespace().map(str::to_owned).collect()
}

/// Standard OAuth2 token response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// OAuth2 error response body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Everything the provider needs to build a consent URL.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    pub identity: &'a str,
    pub scopes: &'a [String],
    pub state: &'a str,
    pub code_challenge: &'a str,
    pub redirect_uri: &'a str,
}

/// Failure talking to the provider's token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The grant was refused (`invalid_grant`, revoked client, bad code).
    /// Retrying with the same input cannot succeed.
    Rejected(String),
    /// Network failure or server-side error.
    Transient(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "rejected: {msg}"),
            Self::Transient(msg) => write!(f, "transient: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// OAuth2 provider endpoints consumed by the credential core.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Client identifier recorded on minted credentials.
    fn client_id(&self) -> &str;

    /// Token endpoint recorded on minted credentials.
    fn token_uri(&self) -> &str;

    /// Build the consent URL the operator's browser is sent to.
    fn authorization_url(&self, request: &AuthorizationRequest<'_>) -> anyhow::Result<String>;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, ProviderError>;

    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ProviderError>;

    /// Identity check against the userinfo endpoint. Diagnostic only.
    async fn userinfo(&self, access_token: &str) -> Result<serde_json::Value, ProviderError>;
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;

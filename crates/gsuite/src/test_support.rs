// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test doubles for the credential core.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::authorizer::UserAgent;
use crate::credential::{
    AuthorizationRequest, Credential, OAuthProvider, ProviderError, TokenResponse,
};

/// Scripted provider that counts calls.
pub struct MockProvider {
    pub exchange_result: Mutex<Result<TokenResponse, ProviderError>>,
    pub refresh_result: Mutex<Result<TokenResponse, ProviderError>>,
    pub userinfo_result: Mutex<Result<serde_json::Value, ProviderError>>,
    pub refresh_delay: Mutex<Duration>,
    pub exchanges: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub userinfo_calls: AtomicUsize,
    /// Codes received by `exchange_code`, in order.
    pub codes: Mutex<Vec<String>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            exchange_result: Mutex::new(Ok(token("exchanged", Some("rt-new"), 3600))),
            refresh_result: Mutex::new(Ok(token("refreshed", None, 3600))),
            userinfo_result: Mutex::new(Ok(serde_json::json!({"email": "a@x.com"}))),
            refresh_delay: Mutex::new(Duration::ZERO),
            exchanges: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            userinfo_calls: AtomicUsize::new(0),
            codes: Mutex::new(Vec::new()),
        }
    }
}

impl MockProvider {
    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OAuthProvider for MockProvider {
    fn client_id(&self) -> &str {
        "mock-client"
    }

    fn token_uri(&self) -> &str {
        "http://mock/token"
    }

    fn authorization_url(&self, request: &AuthorizationRequest<'_>) -> anyhow::Result<String> {
        let url = url::Url::parse_with_params(
            "https://auth.test/authorize",
            &[
                ("state", request.state),
                ("redirect_uri", request.redirect_uri),
                ("login_hint", request.identity),
            ],
        )?;
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        code: &str,
        _code_verifier: &str,
        _redirect_uri: &str,
    ) -> Result<TokenResponse, ProviderError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        self.codes.lock().push(code.to_owned());
        self.exchange_result.lock().clone()
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse, ProviderError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.refresh_result.lock().clone()
    }

    async fn userinfo(&self, _access_token: &str) -> Result<serde_json::Value, ProviderError> {
        self.userinfo_calls.fetch_add(1, Ordering::SeqCst);
        self.userinfo_result.lock().clone()
    }
}

pub fn token(access: &str, refresh: Option<&str>, expires_in: u64) -> TokenResponse {
    TokenResponse {
        access_token: access.to_owned(),
        refresh_token: refresh.map(str::to_owned),
        expires_in: Some(expires_in),
        token_type: Some("Bearer".to_owned()),
        scope: None,
    }
}

/// A stored credential expiring `expires_in_ms` from now (negative = already expired).
pub fn credential(identity: &str, refresh: Option<&str>, expires_in_ms: i64) -> Credential {
    let now = crate::credential::epoch_ms() as i64;
    Credential {
        identity: identity.to_owned(),
        access_token: format!("at-{identity}"),
        refresh_token: refresh.map(str::to_owned),
        expires_at_ms: (now + expires_in_ms).max(0) as u64,
        scopes: ["openid".to_owned()].into_iter().collect(),
        token_type: "Bearer".to_owned(),
        client_id: "mock-client".to_owned(),
        token_uri: "http://mock/token".to_owned(),
    }
}

/// User agent that forwards every opened URL to a channel instead of a browser.
pub struct CapturingAgent {
    tx: mpsc::UnboundedSender<String>,
}

impl CapturingAgent {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl UserAgent for CapturingAgent {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        self.tx.send(url.to_owned())?;
        Ok(())
    }
}

/// Play the browser: follow the consent URL's redirect_uri back to the
/// loopback listener with `extra` query parameters (plus the echoed state).
pub async fn complete_callback(
    auth_url: &str,
    extra: &[(&str, &str)],
) -> anyhow::Result<(u16, String)> {
    let query = consent_query(auth_url)?;
    let redirect = redirect_uri(&query)?;
    let state = query.get("state").cloned().unwrap_or_default();

    let mut params: Vec<(&str, &str)> = vec![("state", state.as_str())];
    params.extend_from_slice(extra);
    let callback = url::Url::parse_with_params(redirect, &params)?;
    get(callback).await
}

/// GET an arbitrary `path` on the callback listener named by the consent URL.
pub async fn visit_listener(auth_url: &str, path: &str) -> anyhow::Result<(u16, String)> {
    let query = consent_query(auth_url)?;
    let mut target = url::Url::parse(redirect_uri(&query)?)?;
    target.set_path(path);
    get(target).await
}

fn consent_query(auth_url: &str) -> anyhow::Result<HashMap<String, String>> {
    Ok(url::Url::parse(auth_url)?.query_pairs().into_owned().collect())
}

fn redirect_uri(query: &HashMap<String, String>) -> anyhow::Result<&str> {
    query
        .get("redirect_uri")
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("consent URL has no redirect_uri"))
}

async fn get(target: url::Url) -> anyhow::Result<(u16, String)> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let resp = reqwest::Client::new().get(target.as_str()).send().await?;
    let status = resp.status().as_u16();
    Ok((status, resp.text().await?))
}

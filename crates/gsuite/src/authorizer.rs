// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot interactive authorization: consent URL in the browser, loopback
//! callback listener, code exchange.
//!
//! Only one flow may run per process (the callback port is a singleton).
//! The listener runs as its own task and hands the code to the waiting call
//! through a oneshot channel; the wait is bounded by a timeout and every exit
//! path tears the listener down.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credential::pkce;
use crate::credential::store::CredentialStore;
use crate::credential::{epoch_ms, AuthorizationRequest, Credential, OAuthProvider, ProviderError};
use crate::error::{AuthError, ErrorCode};

/// Path the provider redirects back to.
pub const CALLBACK_PATH: &str = "/code";

/// Default loopback port for the callback listener.
pub const DEFAULT_CALLBACK_PORT: u16 = 4100;

/// Body returned to the browser once a code has been captured.
pub const SUCCESS_BODY: &str = "Auth successful! You can close the tab!";

/// Opens a URL in the operator's user agent.
pub trait UserAgent: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

/// The platform default browser.
pub struct SystemBrowser;

impl UserAgent for SystemBrowser {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        open::that(url)?;
        Ok(())
    }
}

/// Headless operation: the URL is only logged.
pub struct NoBrowser;

impl UserAgent for NoBrowser {
    fn open(&self, _url: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Listener and timeout settings for the interactive flow.
#[derive(Debug, Clone)]
pub struct AuthorizerConfig {
    /// Loopback port to bind. Zero picks an ephemeral port.
    pub port: u16,
    /// How long to wait for the browser callback.
    pub timeout: Duration,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_CALLBACK_PORT, timeout: Duration::from_secs(300) }
    }
}

/// In-memory state of one pending authorization attempt.
#[derive(Debug, Clone)]
pub struct AuthorizationState {
    pub identity: String,
    pub requested_scopes: Vec<String>,
    /// CSRF nonce echoed back by the provider.
    pub state: String,
    pub code_verifier: String,
    pub redirect_uri: String,
}

/// What the callback listener captured.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CallbackOutcome {
    Code(String),
    Denied(String),
}

/// Flow slot shared by every authorizer built with [`InteractiveAuthorizer::new`].
static PROCESS_FLOW_SLOT: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Drives the browser consent round trip for identities with no credential.
pub struct InteractiveAuthorizer {
    provider: Arc<dyn OAuthProvider>,
    store: Arc<dyn CredentialStore>,
    user_agent: Arc<dyn UserAgent>,
    config: AuthorizerConfig,
    in_flight: Arc<AtomicBool>,
}

impl InteractiveAuthorizer {
    pub fn new(
        provider: Arc<dyn OAuthProvider>,
        store: Arc<dyn CredentialStore>,
        user_agent: Arc<dyn UserAgent>,
        config: AuthorizerConfig,
    ) -> Self {
        let in_flight = Arc::clone(PROCESS_FLOW_SLOT.get_or_init(Default::default));
        Self { provider, store, user_agent, config, in_flight }
    }

    /// Use a flow slot of its own instead of the process-wide one.
    ///
    /// Only for callers that give each authorizer its own callback port,
    /// such as tests running flows side by side on ephemeral ports.
    pub fn with_own_slot(mut self) -> Self {
        self.in_flight = Arc::new(AtomicBool::new(false));
        self
    }

    /// True while a flow holds the callback port.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run the full consent flow for `identity` and persist the resulting credential.
    pub async fn run_flow(
        &self,
        identity: &str,
        requested_scopes: &[String],
    ) -> Result<Credential, AuthError> {
        let _slot = FlowSlot::acquire(&self.in_flight).ok_or_else(|| {
            AuthError::new(
                ErrorCode::AuthorizationInProgress,
                "another interactive authorization is already in progress; retry later",
            )
        })?;

        let listener =
            TcpListener::bind((Ipv4Addr::LOCALHOST, self.config.port)).await.map_err(|e| {
                AuthError::internal(format!(
                    "failed to bind callback listener on port {}: {e}",
                    self.config.port
                ))
            })?;
        let port = listener.local_addr().map_err(AuthError::internal)?.port();

        let code_verifier = pkce::generate_code_verifier();
        let pending = AuthorizationState {
            identity: identity.to_owned(),
            requested_scopes: requested_scopes.to_vec(),
            state: pkce::generate_state(),
            redirect_uri: format!("http://localhost:{port}{CALLBACK_PATH}"),
            code_verifier,
        };
        let code_challenge = pkce::compute_code_challenge(&pending.code_verifier);
        let auth_url = self
            .provider
            .authorization_url(&AuthorizationRequest {
                identity,
                scopes: &pending.requested_scopes,
                state: &pending.state,
                code_challenge: &code_challenge,
                redirect_uri: &pending.redirect_uri,
            })
            .map_err(|e| AuthError::internal(format!("{e:#}")))?;

        let (tx, rx) = oneshot::channel();
        let shutdown = CancellationToken::new();
        // Dropped on every return path below, which stops the listener.
        let _listener_guard = shutdown.clone().drop_guard();
        let router = callback_router(pending.state.clone(), tx);
        tokio::spawn(async move {
            let server = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned());
            if let Err(e) = server.await {
                warn!(err = %e, "callback listener failed");
            }
            debug!(port, "callback listener stopped");
        });

        info!(account = %identity, port, "waiting for browser authorization");
        info!("authorization URL: {auth_url}");
        if let Err(e) = self.user_agent.open(&auth_url) {
            warn!(err = %e, "failed to open browser; open the authorization URL manually");
        }

        let outcome = match tokio::time::timeout(self.config.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                return Err(AuthError::internal("callback listener stopped before a code arrived"))
            }
            Err(_) => {
                warn!(account = %identity, "interactive authorization timed out");
                return Err(AuthError::new(
                    ErrorCode::AuthorizationTimedOut,
                    format!(
                        "{identity}: no authorization callback within {}s",
                        self.config.timeout.as_secs()
                    ),
                ));
            }
        };

        let code = match outcome {
            CallbackOutcome::Code(code) => code,
            CallbackOutcome::Denied(reason) => {
                warn!(account = %identity, reason = %reason, "authorization denied in browser");
                return Err(AuthError::new(
                    ErrorCode::AuthorizationDenied,
                    format!("{identity}: consent was not granted ({reason})"),
                ));
            }
        };

        let token = self
            .provider
            .exchange_code(&code, &pending.code_verifier, &pending.redirect_uri)
            .await
            .map_err(|e| match e {
                ProviderError::Rejected(msg) => AuthError::new(
                    ErrorCode::AuthorizationDenied,
                    format!("{identity}: authorization code rejected ({msg})"),
                ),
                ProviderError::Transient(msg) => AuthError::new(
                    ErrorCode::ProviderUnavailable,
                    format!("{identity}: code exchange failed: {msg}"),
                ),
            })?;

        let credential = Credential::from_exchange(
            identity,
            token,
            &pending.requested_scopes,
            self.provider.client_id(),
            self.provider.token_uri(),
            epoch_ms(),
        );
        self.store.save(identity, &credential).map_err(|e| {
            AuthError::internal(format!("{identity}: failed to persist credential: {e:#}"))
        })?;

        info!(account = %identity, "interactive authorization complete");
        Ok(credential)
    }
}

/// Holds the process-wide flow slot; releases it on drop.
struct FlowSlot(Arc<AtomicBool>);

impl FlowSlot {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for FlowSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct CallbackState {
    expected_state: String,
    tx: Mutex<Option<oneshot::Sender<CallbackOutcome>>>,
}

impl CallbackState {
    /// Hand the outcome to the waiting flow. False if one was already delivered.
    fn deliver(&self, outcome: CallbackOutcome) -> bool {
        match self.tx.lock().take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// Route table for the loopback listener: `GET /code`, everything else 404.
fn callback_router(expected_state: String, tx: oneshot::Sender<CallbackOutcome>) -> Router {
    let state = Arc::new(CallbackState { expected_state, tx: Mutex::new(Some(tx)) });
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .fallback(|| async { (StatusCode::NOT_FOUND, "Not found") })
        .with_state(state)
}

async fn handle_callback(
    State(s): State<Arc<CallbackState>>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    if let Some(returned) = query.get("state") {
        if *returned != s.expected_state {
            warn!("callback state mismatch, ignoring request");
            return (StatusCode::BAD_REQUEST, "State mismatch".to_owned());
        }
    }

    if let Some(code) = query.get("code").filter(|c| !c.is_empty()) {
        if s.deliver(CallbackOutcome::Code(code.clone())) {
            return (StatusCode::OK, SUCCESS_BODY.to_owned());
        }
        return (StatusCode::GONE, "Authorization already handled".to_owned());
    }

    if let Some(reason) = query.get("error") {
        s.deliver(CallbackOutcome::Denied(reason.clone()));
        return (StatusCode::BAD_REQUEST, format!("Authorization failed: {reason}"));
    }

    (StatusCode::BAD_REQUEST, "Missing code parameter".to_owned())
}

#[cfg(test)]
#[path = "authorizer_tests.rs"]
mod tests;

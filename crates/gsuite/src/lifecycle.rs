// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential lifecycle: load, validate, refresh or interactively authorize.
//!
//! Every guarded call funnels through [`TokenLifecycleManager::ensure_authorized`].
//! Calls for the same identity are serialized so that one expired credential
//! produces at most one refresh (or one interactive flow); calls for
//! different identities proceed independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::account::AccountRegistry;
use crate::authorizer::InteractiveAuthorizer;
use crate::credential::store::CredentialStore;
use crate::credential::{epoch_ms, Credential, OAuthProvider, ProviderError};
use crate::error::{AuthError, ErrorCode};

/// Knobs for validity checks and authorization.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Treat a credential as expired this long before its real expiry.
    pub expiry_skew: Duration,
    /// Call the userinfo endpoint after loading a valid credential.
    pub verify_on_use: bool,
    /// Scopes requested by interactive authorization.
    pub scopes: Vec<String>,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            expiry_skew: Duration::ZERO,
            verify_on_use: false,
            scopes: crate::credential::DEFAULT_SCOPES.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

/// Stored credential state of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Usable without a refresh.
    Valid,
    /// Stored but past expiry; the next call refreshes it.
    Expired,
    /// Never authorized.
    Missing,
    /// The credential file exists but cannot be read.
    Unreadable,
}

/// Status info for an account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatusInfo {
    pub email: String,
    pub status: AccountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
    pub has_refresh_token: bool,
}

pub struct TokenLifecycleManager {
    registry: Arc<AccountRegistry>,
    store: Arc<dyn CredentialStore>,
    provider: Arc<dyn OAuthProvider>,
    authorizer: InteractiveAuthorizer,
    options: LifecycleOptions,
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenLifecycleManager {
    pub fn new(
        registry: Arc<AccountRegistry>,
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn OAuthProvider>,
        authorizer: InteractiveAuthorizer,
        options: LifecycleOptions,
    ) -> Self {
        Self { registry, store, provider, authorizer, options, locks: Default::default() }
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    /// Return a credential for `identity` that is valid right now.
    ///
    /// Unknown identities fail before any credential I/O. A missing credential
    /// starts the interactive flow; an expired one is refreshed exactly once.
    pub async fn ensure_authorized(&self, identity: &str) -> Result<Credential, AuthError> {
        if !self.registry.is_known(identity) {
            return Err(AuthError::unknown_account(identity));
        }

        let lock = self.lock_for(identity);
        let _guard = lock.lock().await;

        let Some(credential) = self.load(identity)? else {
            tracing::info!(
                account = %identity,
                "no stored credential, starting interactive authorization"
            );
            return self.authorizer.run_flow(identity, &self.options.scopes).await;
        };

        if credential.is_usable(epoch_ms(), self.skew_ms()) {
            tracing::debug!(account = %identity, "stored credential is valid");
            if self.options.verify_on_use {
                self.verify(&credential).await;
            }
            return Ok(credential);
        }

        self.refresh(identity, &credential).await
    }

    /// Run the interactive flow for a known identity, replacing any stored credential.
    pub async fn authorize(&self, identity: &str) -> Result<Credential, AuthError> {
        if !self.registry.is_known(identity) {
            return Err(AuthError::unknown_account(identity));
        }
        let lock = self.lock_for(identity);
        let _guard = lock.lock().await;
        self.authorizer.run_flow(identity, &self.options.scopes).await
    }

    /// Credential status for every configured account, in registry order.
    pub fn status(&self) -> Vec<AccountStatusInfo> {
        let now = epoch_ms();
        self.registry
            .list_accounts()
            .iter()
            .map(|account| match self.store.load(&account.email) {
                Ok(Some(cred)) => AccountStatusInfo {
                    email: account.email.clone(),
                    status: if cred.is_usable(now, self.skew_ms()) {
                        AccountStatus::Valid
                    } else {
                        AccountStatus::Expired
                    },
                    expires_in_secs: cred.expires_in_secs(now),
                    has_refresh_token: cred.refresh_token.is_some(),
                },
                Ok(None) => AccountStatusInfo {
                    email: account.email.clone(),
                    status: AccountStatus::Missing,
                    expires_in_secs: None,
                    has_refresh_token: false,
                },
                Err(e) => {
                    tracing::warn!(account = %account.email, err = %e, "failed to read credential");
                    AccountStatusInfo {
                        email: account.email.clone(),
                        status: AccountStatus::Unreadable,
                        expires_in_secs: None,
                        has_refresh_token: false,
                    }
                }
            })
            .collect()
    }

    fn lock_for(&self, identity: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.lock().entry(identity.to_owned()).or_default())
    }

    fn skew_ms(&self) -> u64 {
        self.options.expiry_skew.as_millis() as u64
    }

    fn load(&self, identity: &str) -> Result<Option<Credential>, AuthError> {
        self.store.load(identity).map_err(|e| {
            AuthError::internal(format!("{identity}: failed to load credential: {e:#}"))
        })
    }

    async fn refresh(&self, identity: &str, stale: &Credential) -> Result<Credential, AuthError> {
        let Some(refresh_token) = stale.refresh_token.as_deref() else {
            tracing::warn!(account = %identity, "credential expired and has no refresh token");
            return Err(AuthError::authorization_required(
                identity,
                "stored credential expired and has no refresh token",
            ));
        };

        match self.provider.refresh(refresh_token).await {
            Ok(token) => {
                let fresh = stale.refreshed(token, epoch_ms());
                self.store.save(identity, &fresh).map_err(|e| {
                    AuthError::internal(format!("{identity}: failed to persist credential: {e:#}"))
                })?;
                tracing::info!(account = %identity, "credentials refreshed");
                Ok(fresh)
            }
            Err(ProviderError::Rejected(reason)) => {
                tracing::warn!(account = %identity, err = %reason, "refresh token rejected");
                Err(AuthError::authorization_required(
                    identity,
                    format!("refresh token was rejected ({reason})"),
                ))
            }
            Err(ProviderError::Transient(reason)) => {
                tracing::warn!(account = %identity, err = %reason, "credential refresh failed");
                Err(AuthError::new(
                    ErrorCode::ProviderUnavailable,
                    format!("{identity}: token refresh failed: {reason}"),
                ))
            }
        }
    }

    /// Diagnostic userinfo call. Never fails the caller.
    async fn verify(&self, credential: &Credential) {
        match self.provider.userinfo(&credential.access_token).await {
            Ok(info) => {
                let email = info.get("email").and_then(|v| v.as_str()).unwrap_or_default();
                if email.is_empty() || email.eq_ignore_ascii_case(&credential.identity) {
                    tracing::debug!(account = %credential.identity, "access token verified");
                } else {
                    tracing::warn!(
                        account = %credential.identity,
                        token_email = %email,
                        "access token belongs to a different account"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    account = %credential.identity,
                    err = %e,
                    "access token verification failed"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;

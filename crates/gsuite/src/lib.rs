// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gsuite-mcp: per-account Google OAuth2 credential lifecycle for MCP tools.

pub mod account;
pub mod authorizer;
pub mod config;
pub mod credential;
pub mod enforcer;
pub mod error;
pub mod lifecycle;
pub mod test_support;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::account::AccountRegistry;
use crate::authorizer::{
    AuthorizerConfig, InteractiveAuthorizer, NoBrowser, SystemBrowser, UserAgent,
};
use crate::config::{Command, Config};
use crate::credential::google::{ClientSecrets, GoogleProvider};
use crate::credential::store::{CredentialStore, FileCredentialStore};
use crate::credential::{epoch_ms, OAuthProvider};
use crate::enforcer::{AuthContext, AuthEnforcer, GuardedOperation, ToolHandler, USER_ID_ARG};
use crate::error::{AuthError, ErrorCode};
use crate::lifecycle::{LifecycleOptions, TokenLifecycleManager};

/// Process-scoped services, built once at startup and shared by every tool.
pub struct App {
    pub registry: Arc<AccountRegistry>,
    pub store: Arc<dyn CredentialStore>,
    pub manager: Arc<TokenLifecycleManager>,
    pub enforcer: AuthEnforcer,
}

impl App {
    /// Load accounts and client secrets from disk and wire the Google provider.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry = Arc::new(AccountRegistry::load(&config.accounts_file)?);
        let secrets = ClientSecrets::load(&config.gauth_file)
            .map_err(|e| AuthError::new(ErrorCode::ConfigurationError, format!("{e:#}")))?;
        let provider: Arc<dyn OAuthProvider> = Arc::new(GoogleProvider::new(secrets)?);
        let store: Arc<dyn CredentialStore> =
            Arc::new(FileCredentialStore::new(&config.credentials_dir));
        let user_agent: Arc<dyn UserAgent> =
            if config.no_browser { Arc::new(NoBrowser) } else { Arc::new(SystemBrowser) };

        Ok(Self::new(
            registry,
            store,
            provider,
            user_agent,
            config.authorizer_config(),
            config.lifecycle_options(),
        ))
    }

    pub fn new(
        registry: Arc<AccountRegistry>,
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn OAuthProvider>,
        user_agent: Arc<dyn UserAgent>,
        authorizer_config: AuthorizerConfig,
        options: LifecycleOptions,
    ) -> Self {
        let authorizer = InteractiveAuthorizer::new(
            Arc::clone(&provider),
            Arc::clone(&store),
            user_agent,
            authorizer_config,
        );
        let manager = Arc::new(TokenLifecycleManager::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            provider,
            authorizer,
            options,
        ));
        let enforcer = AuthEnforcer::new(Arc::clone(&manager));
        Self { registry, store, manager, enforcer }
    }

    /// Log which configured accounts already have a stored credential.
    pub fn log_stored_credentials(&self) {
        for account in self.registry.list_accounts() {
            match self.store.load(&account.email) {
                Ok(Some(_)) => info!(account = %account.email, "found stored credential"),
                Ok(None) => info!(account = %account.email, "no stored credential"),
                Err(e) => warn!(account = %account.email, err = %e, "unreadable stored credential"),
            }
        }
    }
}

/// Returns the valid access token and its metadata.
pub struct AccessTokenHandler;

#[async_trait]
impl ToolHandler for AccessTokenHandler {
    async fn call(&self, ctx: AuthContext, _args: Value) -> anyhow::Result<Value> {
        let cred = ctx.credential;
        Ok(json!({
            "identity": ctx.identity,
            "token_type": cred.token_type,
            "access_token": cred.access_token,
            "expires_in_secs": cred.expires_in_secs(epoch_ms()),
            "scopes": cred.scopes,
        }))
    }
}

/// Run one CLI command. Returns the process exit code.
pub async fn run(config: Config) -> anyhow::Result<i32> {
    let app = App::from_config(&config)?;
    app.log_stored_credentials();

    tokio::select! {
        code = dispatch(&app, config.command) => code,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            Ok(130)
        }
    }
}

async fn dispatch(app: &App, command: Command) -> anyhow::Result<i32> {
    match command {
        Command::Accounts => {
            for account in app.registry.list_accounts() {
                println!("{}", account.describe());
            }
            Ok(0)
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&app.manager.status())?);
            Ok(0)
        }
        Command::Auth { email } => {
            let cred = app.manager.authorize(&email).await?;
            info!(account = %cred.identity, scopes = cred.scopes.len(), "account authorized");
            Ok(0)
        }
        Command::Token { email } => {
            let op = GuardedOperation::new("token", app.enforcer.clone(), AccessTokenHandler);
            let mut args = serde_json::Map::new();
            args.insert(USER_ID_ARG.to_owned(), Value::String(email));
            let out = op.invoke_json(Value::Object(args)).await;
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(if out.get("error").is_some() { 1 } else { 0 })
        }
    }
}

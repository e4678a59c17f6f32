// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authorization gate in front of every user-data operation.
//!
//! Operations never see a request without a resolved identity and a valid
//! credential: [`GuardedOperation`] runs [`AuthEnforcer::check`] first and
//! hands the handler an [`AuthContext`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::credential::Credential;
use crate::error::{AuthError, ErrorCode};
use crate::lifecycle::TokenLifecycleManager;

/// Argument key carrying the acting identity on every tool call.
pub const USER_ID_ARG: &str = "__user_id__";

/// Identity and credential resolved for one invocation.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub identity: String,
    pub credential: Credential,
}

/// An operation that acts on behalf of a Google account.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: AuthContext, args: Value) -> anyhow::Result<Value>;
}

#[derive(Clone)]
pub struct AuthEnforcer {
    manager: Arc<TokenLifecycleManager>,
}

impl AuthEnforcer {
    pub fn new(manager: Arc<TokenLifecycleManager>) -> Self {
        Self { manager }
    }

    /// Pull the acting identity out of tool arguments.
    pub fn identity_of(args: &Value) -> Result<&str, AuthError> {
        match args.get(USER_ID_ARG) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
            Some(Value::String(_)) | None | Some(Value::Null) => Err(AuthError::new(
                ErrorCode::MissingIdentity,
                format!("missing required argument `{USER_ID_ARG}`"),
            )),
            Some(other) => Err(AuthError::new(
                ErrorCode::MissingIdentity,
                format!("`{USER_ID_ARG}` must be an email string, got {other}"),
            )),
        }
    }

    /// Resolve identity and a valid credential, or fail without side effects
    /// on the operation.
    pub async fn check(&self, args: &Value) -> Result<AuthContext, AuthError> {
        let identity = Self::identity_of(args)?;
        let credential = self.manager.ensure_authorized(identity).await?;
        Ok(AuthContext { identity: identity.to_owned(), credential })
    }
}

/// A [`ToolHandler`] that only runs after [`AuthEnforcer::check`] succeeds.
pub struct GuardedOperation<H> {
    name: String,
    enforcer: AuthEnforcer,
    handler: H,
}

impl<H: ToolHandler> GuardedOperation<H> {
    pub fn new(name: impl Into<String>, enforcer: AuthEnforcer, handler: H) -> Self {
        Self { name: name.into(), enforcer, handler }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Authorize, then run the handler. Authorization failures surface as
    /// [`AuthError`] inside the returned error.
    pub async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
        let ctx = self.enforcer.check(&args).await?;
        tracing::debug!(tool = %self.name, account = %ctx.identity, "invoking guarded operation");
        self.handler.call(ctx, args).await
    }

    /// Like [`invoke`](Self::invoke), but every failure is rendered as the
    /// JSON error envelope instead of propagated.
    pub async fn invoke_json(&self, args: Value) -> Value {
        match self.invoke(args).await {
            Ok(value) => value,
            Err(e) => {
                let err = e
                    .downcast::<AuthError>()
                    .unwrap_or_else(|e| AuthError::new(ErrorCode::Internal, format!("{e:#}")));
                tracing::warn!(
                    tool = %self.name,
                    code = %err.code,
                    err = %err.message,
                    "tool call failed"
                );
                serde_json::to_value(err.to_response()).unwrap_or(Value::Null)
            }
        }
    }
}

#[cfg(test)]
#[path = "enforcer_tests.rs"]
mod tests;

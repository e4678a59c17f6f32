// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator-configured Google accounts.
//!
//! Loaded once from `--accounts-file` and immutable afterwards. Every tool call
//! names one of these identities; anything else is rejected before the
//! credential store is consulted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, ErrorCode};

/// A single configured account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Email address, the identity tool calls act on behalf of.
    pub email: String,
    /// Free-form kind ("personal", "work", ...).
    #[serde(default)]
    pub account_type: String,
    /// Operator notes shown to agents when picking an identity.
    #[serde(default)]
    pub extra_info: String,
}

impl Account {
    /// One-line description used in tool parameter docs.
    pub fn describe(&self) -> String {
        format!("{} ({}, {})", self.email, self.account_type, self.extra_info)
    }
}

/// On-disk shape of the accounts file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountsFile {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

/// The set of identities this process may act for.
#[derive(Debug, Clone)]
pub struct AccountRegistry {
    accounts: Vec<Account>,
}

impl AccountRegistry {
    /// Build a registry from already-parsed accounts.
    ///
    /// Duplicate emails keep the first entry.
    pub fn new(accounts: Vec<Account>) -> Self {
        let mut unique: Vec<Account> = Vec::with_capacity(accounts.len());
        for acct in accounts {
            if unique.iter().any(|a| a.email == acct.email) {
                tracing::warn!(account = %acct.email, "duplicate account entry ignored");
                continue;
            }
            unique.push(acct);
        }
        Self { accounts: unique }
    }

    /// Read and validate the accounts file.
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AuthError::new(
                ErrorCode::ConfigurationError,
                format!("failed to read accounts file {}: {e}", path.display()),
            )
        })?;
        Self::parse(&contents).map_err(|e| {
            let message = format!("{}: {}", path.display(), e.message);
            AuthError::new(ErrorCode::ConfigurationError, message)
        })
    }

    /// Parse accounts JSON. Empty account lists are a configuration error.
    pub fn parse(json: &str) -> Result<Self, AuthError> {
        let file: AccountsFile = serde_json::from_str(json).map_err(|e| {
            AuthError::new(ErrorCode::ConfigurationError, format!("malformed accounts file: {e}"))
        })?;
        if file.accounts.is_empty() {
            return Err(AuthError::new(ErrorCode::ConfigurationError, "no accounts specified"));
        }
        if let Some(bad) = file.accounts.iter().find(|a| a.email.trim().is_empty()) {
            return Err(AuthError::new(
                ErrorCode::ConfigurationError,
                format!("account entry with empty email ({})", bad.account_type),
            ));
        }
        Ok(Self::new(file.accounts))
    }

    pub fn list_accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn is_known(&self, identity: &str) -> bool {
        self.get(identity).is_some()
    }

    pub fn get(&self, identity: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.email == identity)
    }
}

#[cfg(test)]
#[path = "account_tests.rs"]
mod tests;

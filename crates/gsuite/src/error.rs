// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes surfaced at the tool-invocation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    UnknownAccount,
    MissingIdentity,
    AuthorizationRequired,
    AuthorizationInProgress,
    AuthorizationDenied,
    AuthorizationTimedOut,
    ConfigurationError,
    ProviderUnavailable,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownAccount => "UNKNOWN_ACCOUNT",
            Self::MissingIdentity => "MISSING_IDENTITY",
            Self::AuthorizationRequired => "AUTHORIZATION_REQUIRED",
            Self::AuthorizationInProgress => "AUTHORIZATION_IN_PROGRESS",
            Self::AuthorizationDenied => "AUTHORIZATION_DENIED",
            Self::AuthorizationTimedOut => "AUTHORIZATION_TIMED_OUT",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether retrying the same call later can succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AuthorizationInProgress | Self::ProviderUnavailable)
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure from the credential core, tagged with its [`ErrorCode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthError {
    pub code: ErrorCode,
    pub message: String,
}

impl AuthError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn unknown_account(identity: &str) -> Self {
        Self::new(
            ErrorCode::UnknownAccount,
            format!("account for email {identity} is not configured"),
        )
    }

    pub fn authorization_required(identity: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::AuthorizationRequired,
            format!("{identity}: {reason}; run `gsuite-mcp auth {identity}` to re-authorize"),
        )
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::Internal, err.to_string())
    }

    /// Render as the JSON error envelope returned to tool callers.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse { error: self.code.to_error_body(self.message.clone()) }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    unknown_account = { ErrorCode::UnknownAccount, false },
    missing_identity = { ErrorCode::MissingIdentity, false },
    authorization_required = { ErrorCode::AuthorizationRequired, false },
    in_progress = { ErrorCode::AuthorizationInProgress, true },
    denied = { ErrorCode::AuthorizationDenied, false },
    timed_out = { ErrorCode::AuthorizationTimedOut, false },
    configuration = { ErrorCode::ConfigurationError, false },
    provider_unavailable = { ErrorCode::ProviderUnavailable, true },
    internal = { ErrorCode::Internal, false },
)]
fn retryable_codes(code: ErrorCode, expected: bool) {
    assert_eq!(code.is_retryable(), expected);
}

#[test]
fn response_envelope_carries_code_and_message() -> anyhow::Result<()> {
    let err = AuthError::unknown_account("nobody@x.com");
    let json = serde_json::to_value(err.to_response())?;
    assert_eq!(json["error"]["code"], "UNKNOWN_ACCOUNT");
    assert!(json["error"]["message"].as_str().unwrap_or_default().contains("nobody@x.com"));
    Ok(())
}

#[test]
fn authorization_required_points_at_setup_command() {
    let err = AuthError::authorization_required("b@x.com", "refresh token revoked");
    assert_eq!(err.code, ErrorCode::AuthorizationRequired);
    assert!(err.message.contains("gsuite-mcp auth b@x.com"));
    assert!(err.to_string().starts_with("AUTHORIZATION_REQUIRED: "));
}

#[test]
fn converts_into_anyhow() {
    let err: anyhow::Error = AuthError::new(ErrorCode::MissingIdentity, "no user").into();
    let back = err.downcast_ref::<AuthError>();
    assert_eq!(back.map(|e| e.code), Some(ErrorCode::MissingIdentity));
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const NOW: u64 = 1_800_000_000_000;

fn stored(expires_at_ms: u64) -> Credential {
    Credential {
        identity: "a@x.com".to_owned(),
        access_token: "old-access".to_owned(),
        refresh_token: Some("old-refresh".to_owned()),
        expires_at_ms,
        scopes: ["openid".to_owned()].into_iter().collect(),
        token_type: "Bearer".to_owned(),
        client_id: "client-1".to_owned(),
        token_uri: "http://localhost/token".to_owned(),
    }
}

#[test]
fn usable_strictly_before_expiry() {
    let cred = stored(NOW + 1);
    assert!(cred.is_usable(NOW, 0));
    assert!(!cred.is_usable(NOW + 1, 0));
    assert!(!cred.is_usable(NOW + 2, 0));
}

#[test]
fn skew_shrinks_usable_window() {
    let cred = stored(NOW + 30_000);
    assert!(cred.is_usable(NOW, 0));
    assert!(!cred.is_usable(NOW, 30_000));
}

#[test]
fn zero_expiry_is_never_usable() {
    assert!(!stored(0).is_usable(0, 0));
}

#[test]
fn from_exchange_uses_requested_scopes_when_absent() {
    let token = TokenResponse {
        access_token: "fresh".into(),
        refresh_token: Some("rt".into()),
        expires_in: Some(3600),
        ..Default::default()
    };
    let requested = vec!["openid".to_owned(), "https://mail.google.com/".to_owned()];
    let cred =
        Credential::from_exchange("a@x.com", token, &requested, "client-1", "http://t", NOW);
    assert_eq!(cred.expires_at_ms, NOW + 3_600_000);
    assert_eq!(cred.scopes.len(), 2);
    assert_eq!(cred.token_type, "Bearer");
    assert_eq!(cred.refresh_token.as_deref(), Some("rt"));
}

#[test]
fn refreshed_keeps_refresh_token_and_scopes_when_not_returned() {
    let old = stored(NOW - 10_000);
    let token = TokenResponse {
        access_token: "new-access".into(),
        expires_in: Some(3600),
        ..Default::default()
    };
    let new = old.refreshed(token, NOW);
    assert_eq!(new.access_token, "new-access");
    assert_eq!(new.refresh_token.as_deref(), Some("old-refresh"));
    assert_eq!(new.scopes, old.scopes);
    assert!(new.is_usable(NOW, 0));
    assert_eq!(new.expires_in_secs(NOW), Some(3600));
}

#[test]
fn refreshed_replaces_rotated_refresh_token_and_scopes() {
    let old = stored(NOW - 10_000);
    let token = TokenResponse {
        access_token: "new-access".into(),
        refresh_token: Some("rotated".into()),
        expires_in: Some(60),
        scope: Some("openid https://www.googleapis.com/auth/calendar".into()),
        token_type: None,
    };
    let new = old.refreshed(token, NOW);
    assert_eq!(new.refresh_token.as_deref(), Some("rotated"));
    assert!(new.scopes.contains("https://www.googleapis.com/auth/calendar"));
    assert_eq!(new.scopes.len(), 2);
}

#[test]
fn debug_redacts_tokens() {
    let rendered = format!("{:?}", stored(NOW));
    assert!(!rendered.contains("old-access"));
    assert!(!rendered.contains("old-refresh"));
    assert!(rendered.contains("a@x.com"));
}

#[test]
fn serde_round_trip_preserves_everything() -> anyhow::Result<()> {
    let cred = stored(NOW);
    let json = serde_json::to_string(&cred)?;
    let back: Credential = serde_json::from_str(&json)?;
    assert_eq!(back, cred);
    Ok(())
}

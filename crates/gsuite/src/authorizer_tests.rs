// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use tokio::sync::oneshot::error::TryRecvError;

use super::*;
use crate::credential::store::MemoryCredentialStore;
use crate::test_support::{complete_callback, visit_listener, CapturingAgent, MockProvider};

fn router_server(state: &str) -> (TestServer, oneshot::Receiver<CallbackOutcome>) {
    let (tx, rx) = oneshot::channel();
    let server =
        TestServer::new(callback_router(state.to_owned(), tx)).expect("create test server");
    (server, rx)
}

struct Harness {
    provider: Arc<MockProvider>,
    store: Arc<MemoryCredentialStore>,
    authorizer: InteractiveAuthorizer,
    urls: tokio::sync::mpsc::UnboundedReceiver<String>,
}

fn harness(timeout: Duration) -> Harness {
    let provider = Arc::new(MockProvider::default());
    let store = Arc::new(MemoryCredentialStore::new());
    let (agent, urls) = CapturingAgent::new();
    let authorizer = InteractiveAuthorizer::new(
        provider.clone(),
        store.clone(),
        agent,
        AuthorizerConfig { port: 0, timeout },
    )
    .with_own_slot();
    Harness { provider, store, authorizer, urls }
}

fn scopes() -> Vec<String> {
    vec!["openid".to_owned()]
}

// -- Callback route table -----------------------------------------------------

#[tokio::test]
async fn unknown_path_is_not_found() {
    let (server, mut rx) = router_server("s1");
    server.get("/favicon.ico").await.assert_status(StatusCode::NOT_FOUND);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn callback_without_code_is_bad_request() {
    let (server, mut rx) = router_server("s1");
    let resp = server.get(CALLBACK_PATH).await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn mismatched_state_is_ignored() {
    let (server, mut rx) = router_server("s1");
    let resp = server
        .get(CALLBACK_PATH)
        .add_query_param("code", "XYZ")
        .add_query_param("state", "forged")
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn code_is_delivered_once() -> anyhow::Result<()> {
    let (server, mut rx) = router_server("s1");
    let resp = server
        .get(CALLBACK_PATH)
        .add_query_param("code", "XYZ")
        .add_query_param("state", "s1")
        .await;
    resp.assert_status_ok();
    assert_eq!(resp.text(), SUCCESS_BODY);
    assert_eq!(rx.try_recv()?, CallbackOutcome::Code("XYZ".to_owned()));

    let again = server.get(CALLBACK_PATH).add_query_param("code", "ABC").await;
    again.assert_status(StatusCode::GONE);
    Ok(())
}

#[tokio::test]
async fn error_param_reports_denial() -> anyhow::Result<()> {
    let (server, mut rx) = router_server("s1");
    let resp = server.get(CALLBACK_PATH).add_query_param("error", "access_denied").await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(rx.try_recv()?, CallbackOutcome::Denied("access_denied".to_owned()));
    Ok(())
}

// -- Full flow over a real loopback port ---------------------------------------

#[tokio::test]
async fn flow_exchanges_code_and_persists() -> anyhow::Result<()> {
    let Harness { provider, store, authorizer, mut urls } = harness(Duration::from_secs(5));

    let browser = async {
        let url = urls.recv().await.ok_or_else(|| anyhow::anyhow!("no consent URL"))?;
        // Stray hits leave the listener up: other paths 404, no code 400.
        let (status, _) = visit_listener(&url, "/favicon.ico").await?;
        assert_eq!(status, 404);
        let (status, _) = complete_callback(&url, &[]).await?;
        assert_eq!(status, 400);
        complete_callback(&url, &[("code", "XYZ")]).await
    };
    let scopes = scopes();
    let (flow, callback) = tokio::join!(authorizer.run_flow("a@x.com", &scopes), browser);

    let (status, body) = callback?;
    assert_eq!(status, 200);
    assert_eq!(body, SUCCESS_BODY);

    let cred = flow?;
    assert_eq!(cred.identity, "a@x.com");
    assert_eq!(cred.access_token, "exchanged");
    assert_eq!(cred.refresh_token.as_deref(), Some("rt-new"));
    assert_eq!(*provider.codes.lock(), vec!["XYZ".to_owned()]);
    assert_eq!(store.load("a@x.com")?, Some(cred));
    assert!(!authorizer.is_in_flight());
    Ok(())
}

#[tokio::test]
async fn listener_stops_after_flow() -> anyhow::Result<()> {
    let Harness { authorizer, mut urls, .. } = harness(Duration::from_secs(5));

    let browser = async {
        let url = urls.recv().await.ok_or_else(|| anyhow::anyhow!("no consent URL"))?;
        complete_callback(&url, &[("code", "XYZ")]).await?;
        Ok::<_, anyhow::Error>(url)
    };
    let scopes = scopes();
    let (flow, url) = tokio::join!(authorizer.run_flow("a@x.com", &scopes), browser);
    flow?;
    let url = url?;

    let mut closed = false;
    for _ in 0..50 {
        if complete_callback(&url, &[("code", "late")]).await.is_err() {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(closed, "callback listener still accepting connections");
    Ok(())
}

#[tokio::test]
async fn browser_error_is_denied_and_nothing_saved() -> anyhow::Result<()> {
    let Harness { provider, store, authorizer, mut urls } = harness(Duration::from_secs(5));

    let browser = async {
        let url = urls.recv().await.ok_or_else(|| anyhow::anyhow!("no consent URL"))?;
        complete_callback(&url, &[("error", "access_denied")]).await
    };
    let scopes = scopes();
    let (flow, callback) = tokio::join!(authorizer.run_flow("a@x.com", &scopes), browser);

    assert_eq!(callback?.0, 400);
    assert_eq!(flow.err().map(|e| e.code), Some(ErrorCode::AuthorizationDenied));
    assert_eq!(store.load("a@x.com")?, None);
    assert_eq!(provider.exchanges(), 0);
    Ok(())
}

#[tokio::test]
async fn flow_times_out_without_callback() -> anyhow::Result<()> {
    let Harness { store, authorizer, .. } = harness(Duration::from_millis(100));
    let err = authorizer.run_flow("a@x.com", &scopes()).await.err().map(|e| e.code);
    assert_eq!(err, Some(ErrorCode::AuthorizationTimedOut));
    assert!(!authorizer.is_in_flight());
    assert_eq!(store.load("a@x.com")?, None);
    Ok(())
}

#[tokio::test]
async fn second_flow_is_refused_while_first_is_pending() -> anyhow::Result<()> {
    let Harness { authorizer, mut urls, .. } = harness(Duration::from_secs(5));
    let authorizer = &authorizer;

    let contender = async {
        let url = urls.recv().await.ok_or_else(|| anyhow::anyhow!("no consent URL"))?;
        assert!(authorizer.is_in_flight());
        let second = authorizer.run_flow("b@x.com", &scopes()).await.err().map(|e| e.code);
        complete_callback(&url, &[("code", "XYZ")]).await?;
        Ok::<_, anyhow::Error>(second)
    };
    let scopes = scopes();
    let (first, second) = tokio::join!(authorizer.run_flow("a@x.com", &scopes), contender);

    assert_eq!(second?, Some(ErrorCode::AuthorizationInProgress));
    assert_eq!(first?.identity, "a@x.com");
    assert!(!authorizer.is_in_flight());
    Ok(())
}

#[tokio::test]
async fn separate_authorizers_share_the_process_slot() -> anyhow::Result<()> {
    let build = || {
        let (agent, urls) = CapturingAgent::new();
        let authorizer = InteractiveAuthorizer::new(
            Arc::new(MockProvider::default()),
            Arc::new(MemoryCredentialStore::new()),
            agent,
            AuthorizerConfig { port: 0, timeout: Duration::from_secs(5) },
        );
        (authorizer, urls)
    };
    let (first, mut urls) = build();
    let (second, _second_urls) = build();

    let contender = async {
        let url = urls.recv().await.ok_or_else(|| anyhow::anyhow!("no consent URL"))?;
        assert!(second.is_in_flight());
        let refused = second.run_flow("b@x.com", &scopes()).await.err().map(|e| e.code);
        complete_callback(&url, &[("code", "XYZ")]).await?;
        Ok::<_, anyhow::Error>(refused)
    };
    let scopes = scopes();
    let (flow, refused) = tokio::join!(first.run_flow("a@x.com", &scopes), contender);

    assert_eq!(refused?, Some(ErrorCode::AuthorizationInProgress));
    assert_eq!(flow?.identity, "a@x.com");
    assert!(!first.is_in_flight() && !second.is_in_flight());
    Ok(())
}

#[tokio::test]
async fn failed_exchange_maps_to_error_code() -> anyhow::Result<()> {
    let cases = [
        (ProviderError::Rejected("bad code".to_owned()), ErrorCode::AuthorizationDenied),
        (ProviderError::Transient("HTTP 503".to_owned()), ErrorCode::ProviderUnavailable),
    ];
    for (failure, expected) in cases {
        let Harness { provider, store, authorizer, mut urls } = harness(Duration::from_secs(5));
        *provider.exchange_result.lock() = Err(failure);

        let browser = async {
            let url = urls.recv().await.ok_or_else(|| anyhow::anyhow!("no consent URL"))?;
            complete_callback(&url, &[("code", "XYZ")]).await
        };
        let scopes = scopes();
        let (flow, callback) = tokio::join!(authorizer.run_flow("a@x.com", &scopes), browser);

        assert_eq!(callback?.0, 200);
        assert_eq!(flow.err().map(|e| e.code), Some(expected));
        assert_eq!(store.load("a@x.com")?, None);
    }
    Ok(())
}

#[tokio::test]
async fn occupied_port_is_internal_error() -> anyhow::Result<()> {
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = blocker.local_addr()?.port();

    let (agent, _urls) = CapturingAgent::new();
    let authorizer = InteractiveAuthorizer::new(
        Arc::new(MockProvider::default()),
        Arc::new(MemoryCredentialStore::new()),
        agent,
        AuthorizerConfig { port, timeout: Duration::from_secs(1) },
    )
    .with_own_slot();

    let err = authorizer.run_flow("a@x.com", &scopes()).await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::Internal));
    assert!(!authorizer.is_in_flight());
    Ok(())
}

#[tokio::test]
async fn failed_browser_launch_still_waits_for_callback() {
    struct Broken;
    impl UserAgent for Broken {
        fn open(&self, _url: &str) -> anyhow::Result<()> {
            anyhow::bail!("no display")
        }
    }

    let authorizer = InteractiveAuthorizer::new(
        Arc::new(MockProvider::default()),
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(Broken),
        AuthorizerConfig { port: 0, timeout: Duration::from_millis(50) },
    )
    .with_own_slot();
    let err = authorizer.run_flow("a@x.com", &scopes()).await.err().map(|e| e.code);
    assert_eq!(err, Some(ErrorCode::AuthorizationTimedOut));
}

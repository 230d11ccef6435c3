//! Integration tests for the request execution loop
//!
//! Drives [`HttpClient`] against a scripted transport to check retry,
//! authentication, rate limiting and cancellation working together.

mod test_support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_core::http::{ErrorKind, TransportError};
use courier_core::{
    AuthenticationInterceptor, BearerToken, CallOptions, Endpoint, Error, FileStore, MemoryStore,
    NetworkError, RateLimit, RetryPolicy, TokenStore,
};
use serde::Deserialize;
use serde_json::{json, Value};
use test_support::*;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    login: String,
}

fn token_store(initial: &str) -> Arc<TokenStore<BearerToken>> {
    let store = Arc::new(TokenStore::new(Arc::new(MemoryStore::new()), "auth"));
    store.save(Some(BearerToken::new(initial))).unwrap();
    store
}

/// Answers 200 only for `Bearer <accepted>`, 401 otherwise
fn accepting(accepted: &'static str) -> MockTransport {
    MockTransport::new(move |request, _| {
        let expected = format!("Bearer {}", accepted);
        if request.header("authorization") == Some(expected.as_str()) {
            ok(r#"{"login": "octocat"}"#)
        } else {
            status(401)
        }
    })
}

// ============================================================================
// Successful calls
// ============================================================================

#[tokio::test]
async fn test_successful_call_decodes_body() {
    let transport = Arc::new(MockTransport::always(200, r#"{"login": "octocat"}"#));
    let client = client(&transport);

    let user: User = client.perform(&Endpoint::get("users/octocat")).await.unwrap();

    assert_eq!(user.login, "octocat");
    assert_eq!(transport.calls(), 1);
    let sent = &transport.requests()[0];
    assert_eq!(sent.url.as_str(), "https://api.example.com/v1/users/octocat");
    assert_eq!(sent.header("accept"), Some("application/json"));
}

#[tokio::test]
async fn test_json_body_and_query_are_sent() {
    let transport = Arc::new(MockTransport::always(201, r#"{"id": 7}"#));
    let client = client(&transport);

    let endpoint = Endpoint::<Value>::post("repos")
        .with_query("org", "rust-lang")
        .with_json(&json!({"name": "courier"}))
        .unwrap();
    let created = client.perform(&endpoint).await.unwrap();

    assert_eq!(created, json!({"id": 7}));
    let sent = &transport.requests()[0];
    assert_eq!(sent.url.query(), Some("org=rust-lang"));
    assert_eq!(sent.header("content-type"), Some("application/json"));
    let body: Value = serde_json::from_slice(sent.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, json!({"name": "courier"}));
}

#[tokio::test]
async fn test_progress_observer_sees_body() {
    let transport = Arc::new(MockTransport::always(200, r#"{"login": "octocat"}"#));
    let client = client(&transport);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let options = CallOptions::new().with_observer(move |received: u64, total: Option<u64>| {
        sink.lock().unwrap().push((received, total));
    });
    let _: User = client
        .perform_with(&Endpoint::get("users/octocat"), options)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, Some(seen[0].0));
}

// ============================================================================
// Retry behaviour
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_server_errors_retried_until_policy_exhausted() {
    let transport = Arc::new(MockTransport::always(503, r#"{"message": "down"}"#));
    let client = builder(&transport)
        .retry_policy(RetryPolicy::default().with_max_attempts(3))
        .build()
        .unwrap();

    let error = client
        .request(&json_endpoint("status"), CallOptions::new())
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), 3);
    assert_eq!(error.kind(), ErrorKind::ServerError);
    assert_eq!(error.status(), Some(503));
    assert_eq!(error.api_message().as_deref(), Some("down"));
}

#[tokio::test(start_paused = true)]
async fn test_server_error_then_success() {
    let transport = Arc::new(MockTransport::sequence(vec![
        status(500),
        status(502),
        ok(r#"{"login": "octocat"}"#),
    ]));
    let client = client(&transport);

    let started = Instant::now();
    let user: User = client.perform(&Endpoint::get("users/octocat")).await.unwrap();

    assert_eq!(user.login, "octocat");
    assert_eq!(transport.calls(), 3);
    // default policy waits at least 0.5s and 1s with jitter
    assert!(started.elapsed() >= Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn test_transport_failures_are_retried() {
    let transport = Arc::new(MockTransport::sequence(vec![
        Err(TransportError::Timeout),
        Err(TransportError::Connect {
            message: "connection refused".to_string(),
        }),
        ok(r#"{"login": "octocat"}"#),
    ]));
    let client = client(&transport);

    let user: User = client.perform(&Endpoint::get("users/octocat")).await.unwrap();

    assert_eq!(user.login, "octocat");
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let transport = Arc::new(MockTransport::always(404, r#"{"message": "Not Found"}"#));
    let client = client(&transport);

    let error = client
        .request(&json_endpoint("missing"), CallOptions::new())
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), 1);
    assert!(matches!(error, NetworkError::ClientError { status: 404, .. }));
}

#[tokio::test]
async fn test_parsing_error_is_not_retried() {
    let transport = Arc::new(MockTransport::always(200, "not json"));
    let client = client(&transport);

    let error = client
        .request(&Endpoint::<User>::get("users/octocat"), CallOptions::new())
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), 1);
    match error {
        NetworkError::ParsingError { body, .. } => assert_eq!(&body[..], b"not json"),
        other => panic!("expected parsing error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_flat_attempt_budget_retries_immediately() {
    let transport = Arc::new(MockTransport::sequence(vec![
        status(500),
        ok(r#"{"login": "octocat"}"#),
    ]));
    let client = builder(&transport).max_attempts(2).build().unwrap();
    assert!(client.retry_policy().is_none());
    assert_eq!(client.max_attempts(), 2);

    let user: User = client.perform(&Endpoint::get("users/octocat")).await.unwrap();
    assert_eq!(user.login, "octocat");
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_policy_takes_precedence_over_attempt_budget() {
    let transport = Arc::new(MockTransport::always(500, "{}"));
    let client = builder(&transport)
        .max_attempts(5)
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();

    let error = client.perform(&json_endpoint("status")).await.unwrap_err();
    assert_eq!(transport.calls(), 1);
    assert!(matches!(
        error,
        Error::Network(NetworkError::ServerError { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_invalid_route_fails_before_sending() {
    let transport = Arc::new(MockTransport::always(200, "{}"));
    let client = client(&transport);

    let error = client
        .request(
            &json_endpoint("users").with_header("bad header", "value"),
            CallOptions::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::InvalidRoute);
    assert_eq!(transport.calls(), 0);
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_unauthorized_refreshes_and_retries_once() {
    let transport = Arc::new(accepting("B"));
    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshes);
    let store = token_store("A");

    let client = builder(&transport)
        .interceptor(AuthenticationInterceptor::new(
            Arc::clone(&store),
            move |current: Option<BearerToken>| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(current.unwrap().access_token, "A");
                    Ok::<_, anyhow::Error>(BearerToken::new("B"))
                }
            },
        ))
        .build()
        .unwrap();

    let user: User = client.perform(&Endpoint::get("users/octocat")).await.unwrap();

    assert_eq!(user.login, "octocat");
    assert_eq!(transport.calls(), 2);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    let requests = transport.requests();
    assert_eq!(requests[0].header("authorization"), Some("Bearer A"));
    assert_eq!(requests[1].header("authorization"), Some("Bearer B"));
    assert_eq!(store.load().unwrap().access_token, "B");
}

#[tokio::test]
async fn test_repeated_unauthorized_gives_up() {
    let transport = Arc::new(accepting("never"));
    let store = token_store("A");
    let client = builder(&transport)
        .interceptor(AuthenticationInterceptor::new(
            store,
            |_: Option<BearerToken>| async { Ok::<_, anyhow::Error>(BearerToken::new("B")) },
        ))
        .build()
        .unwrap();

    let error = client
        .request(&json_endpoint("me"), CallOptions::new())
        .await
        .unwrap_err();

    // one refresh allowed, then the second 401 surfaces
    assert_eq!(transport.calls(), 2);
    assert!(error.is_unauthorized());
}

#[tokio::test]
async fn test_unauthorized_without_interceptor_is_not_retried() {
    let transport = Arc::new(MockTransport::always(401, "{}"));
    let client = client(&transport);

    let error = client
        .request(&json_endpoint("me"), CallOptions::new())
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), 1);
    assert_eq!(error.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn test_refresh_failure_surfaces_as_authentication_failed() {
    let transport = Arc::new(accepting("B"));
    let store = token_store("A");
    let client = builder(&transport)
        .interceptor(AuthenticationInterceptor::new(
            Arc::clone(&store),
            |_: Option<BearerToken>| async {
                Err::<BearerToken, _>(anyhow::anyhow!("refresh token revoked"))
            },
        ))
        .build()
        .unwrap();

    let error = client
        .request(&json_endpoint("me"), CallOptions::new())
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), 1);
    match error {
        NetworkError::AuthenticationFailed { message } => {
            assert!(message.contains("refresh token revoked"))
        }
        other => panic!("expected authentication failure, got {:?}", other),
    }
    assert_eq!(store.load().unwrap().access_token, "A");
    assert!(!store.is_refreshing());
}

/// Eight concurrent calls that all send "A" and get a 401, through one
/// interceptor with the default unauthorized cap
async fn concurrent_unauthorized(refresh_backoff: Option<Duration>) {
    const CALLERS: usize = 8;

    let transport = Arc::new(accepting("B").with_latency(Duration::from_millis(10)));
    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshes);
    let store = token_store("A");

    let mut interceptor =
        AuthenticationInterceptor::new(Arc::clone(&store), move |_: Option<BearerToken>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, anyhow::Error>(BearerToken::new("B"))
            }
        });
    if let Some(delay) = refresh_backoff {
        interceptor = interceptor.with_refresh_backoff(delay);
    }
    let client = builder(&transport).interceptor(interceptor).build().unwrap();

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .perform::<Endpoint<User>>(&Endpoint::get("me"))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let user = handle.await.unwrap().unwrap();
        assert_eq!(user.login, "octocat");
    }

    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(transport.calls(), CALLERS * 2);
    assert_eq!(store.load().unwrap().access_token, "B");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_unauthorized_calls_share_one_refresh() {
    concurrent_unauthorized(None).await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_unauthorized_calls_share_refresh_backoff() {
    concurrent_unauthorized(Some(Duration::from_millis(30))).await;
}

#[tokio::test]
async fn test_no_retry_budget_skips_refresh() {
    let transport = Arc::new(accepting("B"));
    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshes);
    let client = builder(&transport)
        .retry_policy(RetryPolicy::none())
        .interceptor(AuthenticationInterceptor::new(
            token_store("A"),
            move |_: Option<BearerToken>| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(BearerToken::new("B"))
                }
            },
        ))
        .build()
        .unwrap();

    let error = client
        .request(&json_endpoint("me"), CallOptions::new())
        .await
        .unwrap_err();

    // interceptor retries draw from the same attempt budget
    assert!(error.is_unauthorized());
    assert_eq!(transport.calls(), 1);
    assert_eq!(refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_expired_token_refreshed_before_send() {
    let transport = Arc::new(accepting("B"));
    let store = Arc::new(TokenStore::new(Arc::new(MemoryStore::new()), "auth"));
    store
        .save(Some(
            BearerToken::new("A").with_expiry(chrono::Utc::now() - chrono::Duration::seconds(1)),
        ))
        .unwrap();

    let client = builder(&transport)
        .interceptor(AuthenticationInterceptor::new(
            Arc::clone(&store),
            |_: Option<BearerToken>| async { Ok::<_, anyhow::Error>(BearerToken::new("B")) },
        ))
        .build()
        .unwrap();

    let _: User = client.perform(&Endpoint::get("me")).await.unwrap();
    assert_eq!(transport.calls(), 1);
    assert_eq!(transport.requests()[0].header("authorization"), Some("Bearer B"));
}

#[tokio::test]
async fn test_refreshed_token_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(accepting("B"));

    {
        let store = Arc::new(TokenStore::new(Arc::new(FileStore::new(dir.path())), "auth"));
        store.save(Some(BearerToken::new("A"))).unwrap();
        let client = builder(&transport)
            .interceptor(AuthenticationInterceptor::new(
                store,
                |_: Option<BearerToken>| async { Ok::<_, anyhow::Error>(BearerToken::new("B")) },
            ))
            .build()
            .unwrap();
        let _: User = client.perform(&Endpoint::get("me")).await.unwrap();
    }

    let reopened: TokenStore<BearerToken> =
        TokenStore::new(Arc::new(FileStore::new(dir.path())), "auth");
    assert_eq!(reopened.load().unwrap().access_token, "B");
}

// ============================================================================
// Rate limiting and cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rate_limit_delays_third_call() {
    let transport = Arc::new(MockTransport::always(200, "{}"));
    let client = builder(&transport)
        .rate_limit(RateLimit::new(2, Duration::from_millis(100)))
        .build()
        .unwrap();

    let started = Instant::now();
    let mut finished = Vec::new();
    for _ in 0..3 {
        client.perform(&json_endpoint("ping")).await.unwrap();
        finished.push(started.elapsed());
    }

    assert!(finished[0] < Duration::from_millis(100));
    assert!(finished[1] < Duration::from_millis(100));
    assert!(finished[2] >= Duration::from_millis(100));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_permit() {
    let transport = Arc::new(MockTransport::always(200, "{}"));
    let client = builder(&transport)
        .rate_limit(RateLimit::new(1, Duration::from_secs(10)))
        .build()
        .unwrap();
    client.perform(&json_endpoint("ping")).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let error = client
        .request(&json_endpoint("ping"), CallOptions::new().with_cancel(cancel))
        .await
        .unwrap_err();

    assert!(error.is_cancelled());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_send() {
    let transport =
        Arc::new(MockTransport::always(200, "{}").with_latency(Duration::from_secs(30)));
    let client = client(&transport);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let error = client
        .request(&json_endpoint("slow"), CallOptions::new().with_cancel(cancel))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_stops_retries() {
    let transport = Arc::new(MockTransport::always(503, "{}"));
    let client = builder(&transport)
        .retry_policy(RetryPolicy::conservative())
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let error = client
        .request(&json_endpoint("status"), CallOptions::new().with_cancel(cancel))
        .await
        .unwrap_err();

    assert!(error.is_cancelled());
    assert_eq!(transport.calls(), 1);
}

use std::time::Duration;

use dashfetch::{CircuitState, FetchConfig, FetchError, RequestOptions};
use httpmock::Method::GET;
use serde_json::json;

use crate::common::{self, ATTEMPT_HEADER};

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let server = common::setup_server();
    let first = server.mock(|when, then| {
        when.method(GET).path("/api/stats").header(ATTEMPT_HEADER, "1");
        then.status(503);
    });
    let second = server.mock(|when, then| {
        when.method(GET).path("/api/stats").header(ATTEMPT_HEADER, "2");
        then.status(503);
    });
    let third = server.mock(|when, then| {
        when.method(GET).path("/api/stats").header(ATTEMPT_HEADER, "3");
        then.status(200).json_body(json!({"holders": 7}));
    });

    let orchestrator = common::orchestrator_for(&server);
    let stats = orchestrator.get("/api/stats").await.unwrap();

    assert_eq!(stats["holders"], 7);
    first.assert_hits(1);
    second.assert_hits(1);
    third.assert_hits(1);

    let status = orchestrator.breaker_status("/api/stats").unwrap();
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.consecutive_failures, 0);
}

#[tokio::test]
async fn client_errors_fail_immediately() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/token");
        then.status(404).json_body(json!({"error": "unknown token"}));
    });

    let orchestrator = common::orchestrator_for(&server);
    let err = orchestrator.get("/api/token").await.unwrap_err();

    mock.assert_hits(1);
    match err {
        FetchError::Http { status, url, .. } => {
            assert_eq!(status, 404);
            assert!(url.ends_with("/api/token"));
        }
        other => panic!("expected Http 404, got {other:?}"),
    }
}

#[tokio::test]
async fn retries_stop_at_the_cap() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/down");
        then.status(500);
    });

    let orchestrator = common::orchestrator_for(&server);
    let err = orchestrator.get("/api/down").await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    mock.assert_hits(4);

    let err = orchestrator
        .fetch_data(
            "/api/down",
            RequestOptions::get(),
            FetchConfig::default().max_retries(1),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(500));
    mock.assert_hits(6);
}

#[tokio::test]
async fn slow_responses_time_out() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/slow");
        then.status(200)
            .json_body(json!({}))
            .delay(Duration::from_millis(500));
    });

    let orchestrator = common::orchestrator_for(&server);
    let err = orchestrator
        .fetch_data(
            "/api/slow",
            RequestOptions::get(),
            FetchConfig::default()
                .timeout(Duration::from_millis(100))
                .max_retries(1),
        )
        .await
        .unwrap_err();

    match err {
        FetchError::Timeout { after, .. } => assert_eq!(after, Duration::from_millis(100)),
        other => panic!("expected Timeout, got {other:?}"),
    }
    mock.assert_hits(2);
    assert_eq!(
        orchestrator
            .breaker_status("/api/slow")
            .unwrap()
            .consecutive_failures,
        1
    );
}

#[tokio::test]
async fn rate_limited_then_success_honors_retry_after() {
    let server = common::setup_server();
    let limited = server.mock(|when, then| {
        when.method(GET)
            .path("/api/orchestrator/token-metrics")
            .header(ATTEMPT_HEADER, "1");
        then.status(429).header("retry-after", "1");
    });
    let ok = server.mock(|when, then| {
        when.method(GET)
            .path("/api/orchestrator/token-metrics")
            .header(ATTEMPT_HEADER, "2");
        then.status(200)
            .json_body(json!({"success": true, "data": {"price": 1.5}}));
    });

    let orchestrator = common::orchestrator_for(&server);
    let started = std::time::Instant::now();
    let price: serde_json::Value = orchestrator
        .fetch_envelope(
            "/api/orchestrator/token-metrics",
            RequestOptions::get(),
            FetchConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(price["price"], 1.5);
    limited.assert_hits(1);
    ok.assert_hits(1);
    // Retry-After is capped at 50ms by the test retry policy.
    assert!(started.elapsed() >= Duration::from_millis(50));

    let status = orchestrator
        .breaker_status("/api/orchestrator/token-metrics")
        .unwrap();
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.throttled, 0);
}

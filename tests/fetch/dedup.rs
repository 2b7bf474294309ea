use std::sync::Arc;
use std::time::Duration;

use dashfetch::{FetchConfig, RequestOptions};
use httpmock::Method::{GET, POST};
use serde_json::json;

use crate::common;

#[tokio::test]
async fn concurrent_identical_calls_share_one_request() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/stats");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"holders": 1200, "volume": 42.5}))
            .delay(Duration::from_millis(200));
    });

    let orchestrator = common::orchestrator_for(&server);
    let (a, b, c) = tokio::join!(
        orchestrator.get("/api/stats"),
        orchestrator.get("/api/stats"),
        orchestrator.fetch_data(
            "/api/stats",
            RequestOptions::get(),
            FetchConfig::default().ttl(Duration::from_secs(60)),
        ),
    );

    mock.assert_hits(1);
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert_eq!(a["holders"], 1200);
    assert!(Arc::ptr_eq(&a, &b) && Arc::ptr_eq(&b, &c));
    assert_eq!(orchestrator.stats().await.in_flight, 0);
}

#[tokio::test]
async fn different_bodies_are_different_requests() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/api/ai/ask");
        then.status(200)
            .json_body(json!({"answer": "ok"}))
            .delay(Duration::from_millis(100));
    });

    let orchestrator = common::orchestrator_for(&server);
    let (a, b) = tokio::join!(
        orchestrator.fetch_data(
            "/api/ai/ask",
            RequestOptions::post(json!({"q": "price?"})),
            FetchConfig::default(),
        ),
        orchestrator.fetch_data(
            "/api/ai/ask",
            RequestOptions::post(json!({"q": "holders?"})),
            FetchConfig::default(),
        ),
    );

    assert!(a.is_ok() && b.is_ok());
    mock.assert_hits(2);
}

#[tokio::test]
async fn request_options_reach_the_server() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/ai/ask")
            .header("x-api-key", "secret")
            .header(common::ATTEMPT_HEADER, "1")
            .json_body(json!({"q": "why"}));
        then.status(200).json_body(json!({"answer": "because"}));
    });

    let orchestrator = common::orchestrator_for(&server);
    let answer: serde_json::Value = orchestrator
        .fetch_json(
            "/api/ai/ask",
            RequestOptions::post(json!({"q": "why"})).header("x-api-key", "secret"),
            FetchConfig::default(),
        )
        .await
        .unwrap();

    mock.assert();
    assert_eq!(answer["answer"], "because");
}

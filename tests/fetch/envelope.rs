use dashfetch::{FetchConfig, FetchError, RequestOptions};
use httpmock::Method::GET;
use serde::Deserialize;
use serde_json::json;

use crate::common;

#[derive(Debug, Deserialize, PartialEq)]
struct TokenMetrics {
    price: f64,
    holders: u64,
}

#[tokio::test]
async fn successful_envelope_yields_data() {
    let server = common::setup_server();
    server.mock(|when, then| {
        when.method(GET).path("/api/orchestrator/token-metrics");
        then.status(200).json_body(json!({
            "success": true,
            "data": {"price": 0.0123, "holders": 5400}
        }));
    });

    let orchestrator = common::orchestrator_for(&server);
    let metrics: TokenMetrics = orchestrator
        .fetch_envelope(
            "/api/orchestrator/token-metrics",
            RequestOptions::get(),
            FetchConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        metrics,
        TokenMetrics {
            price: 0.0123,
            holders: 5400
        }
    );
}

#[tokio::test]
async fn unsuccessful_envelope_is_an_api_error() {
    let server = common::setup_server();
    server.mock(|when, then| {
        when.method(GET).path("/api/orchestrator/ai-summary");
        then.status(200)
            .json_body(json!({"success": false, "error": "model unavailable"}));
    });

    let orchestrator = common::orchestrator_for(&server);
    let err = orchestrator
        .fetch_envelope::<serde_json::Value>(
            "/api/orchestrator/ai-summary",
            RequestOptions::get(),
            FetchConfig::default(),
        )
        .await
        .unwrap_err();

    match err {
        FetchError::Api(msg) => assert_eq!(msg, "model unavailable"),
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn shape_mismatch_is_a_decode_error() {
    let server = common::setup_server();
    server.mock(|when, then| {
        when.method(GET).path("/api/orchestrator/token-metrics");
        then.status(200)
            .json_body(json!({"success": true, "data": {"price": "n/a"}}));
    });

    let orchestrator = common::orchestrator_for(&server);
    let err = orchestrator
        .fetch_envelope::<TokenMetrics>(
            "/api/orchestrator/token-metrics",
            RequestOptions::get(),
            FetchConfig::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)), "{err:?}");
}

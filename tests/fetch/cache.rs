use std::time::Duration;

use dashfetch::{CacheMode, FetchConfig, FetchError, RequestOptions};
use httpmock::Method::GET;
use serde_json::json;

use crate::common;

#[tokio::test]
async fn fresh_entry_is_served_without_network() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/price");
        then.status(200).json_body(json!({"usd": 0.42}));
    });

    let orchestrator = common::orchestrator_for(&server);
    let cfg = FetchConfig::default().ttl(Duration::from_millis(150));

    let first = orchestrator
        .fetch_data("/api/price", RequestOptions::get(), cfg.clone())
        .await
        .unwrap();
    let second = orchestrator
        .fetch_data("/api/price", RequestOptions::get(), cfg.clone())
        .await
        .unwrap();
    assert_eq!(first, second);
    mock.assert_hits(1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    orchestrator
        .fetch_data("/api/price", RequestOptions::get(), cfg)
        .await
        .unwrap();
    mock.assert_hits(2);
}

#[tokio::test]
async fn refresh_and_bypass_skip_the_cache() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/price");
        then.status(200).json_body(json!({"usd": 0.42}));
    });
    let orchestrator = common::orchestrator_for(&server);

    orchestrator.get("/api/price").await.unwrap();
    orchestrator
        .fetch_data(
            "/api/price",
            RequestOptions::get(),
            FetchConfig::default().cache_mode(CacheMode::Refresh),
        )
        .await
        .unwrap();
    mock.assert_hits(2);

    orchestrator.get("/api/price").await.unwrap();
    mock.assert_hits(2);

    orchestrator.clear_cache().await;
    orchestrator
        .fetch_data(
            "/api/price",
            RequestOptions::get(),
            FetchConfig::default().cache_mode(CacheMode::Bypass),
        )
        .await
        .unwrap();
    assert_eq!(orchestrator.stats().await.cached_entries, 0);
    orchestrator.get("/api/price").await.unwrap();
    mock.assert_hits(4);
}

#[tokio::test]
async fn invalidate_drops_matching_entries() {
    let server = common::setup_server();
    let holders = server.mock(|when, then| {
        when.method(GET).path("/api/holders");
        then.status(200).json_body(json!([]));
    });
    let price = server.mock(|when, then| {
        when.method(GET).path("/api/price");
        then.status(200).json_body(json!({"usd": 1}));
    });
    let orchestrator = common::orchestrator_for(&server);

    orchestrator.get("/api/holders?token=a").await.unwrap();
    orchestrator.get("/api/holders?token=b").await.unwrap();
    orchestrator.get("/api/price").await.unwrap();
    assert_eq!(orchestrator.stats().await.cached_entries, 3);

    assert_eq!(orchestrator.invalidate("/api/holders").await, 2);
    orchestrator.get("/api/holders?token=a").await.unwrap();
    orchestrator.get("/api/price").await.unwrap();

    holders.assert_hits(3);
    price.assert_hits(1);
}

#[tokio::test]
async fn errors_are_never_cached() {
    let server = common::setup_server();
    let mut missing = server.mock(|when, then| {
        when.method(GET).path("/api/token");
        then.status(404);
    });
    let orchestrator = common::orchestrator_for(&server);

    let err = orchestrator.get("/api/token").await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    missing.delete();

    let found = server.mock(|when, then| {
        when.method(GET).path("/api/token");
        then.status(200).json_body(json!({"symbol": "DASH"}));
    });
    let token = orchestrator.get("/api/token").await.unwrap();
    assert_eq!(token["symbol"], "DASH");
    found.assert_hits(1);
}

#[tokio::test]
async fn zero_ttl_disables_caching() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/live");
        then.status(200).body("");
    });
    let orchestrator = common::builder_for(&server)
        .cache_ttl(Duration::ZERO)
        .build()
        .unwrap();

    let empty = orchestrator.get("/api/live").await.unwrap();
    assert!(empty.is_null(), "empty body decodes to null");
    orchestrator.get("/api/live").await.unwrap();
    mock.assert_hits(2);

    let bad = server.mock(|when, then| {
        when.method(GET).path("/api/garbled");
        then.status(200).body("<html>");
    });
    let err = orchestrator.get("/api/garbled").await.unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)), "{err:?}");
    bad.assert_hits(1);
}

use std::time::Duration;

use dashfetch::FetchError;
use httpmock::Method::GET;
use serde_json::json;

use crate::common;

#[tokio::test]
async fn cancel_removes_queued_requests_only() {
    let server = common::setup_server();
    let slow = server.mock(|when, then| {
        when.method(GET).path("/api/slow");
        then.status(200)
            .json_body(json!({"done": true}))
            .delay(Duration::from_millis(300));
    });
    let queued = server.mock(|when, then| {
        when.method(GET).path("/api/widgets");
        then.status(200).json_body(json!([]));
    });

    let orchestrator = common::builder_for(&server)
        .max_concurrent(1)
        .build()
        .unwrap();

    let o = orchestrator.clone();
    let running = tokio::spawn(async move { o.get("/api/slow").await });
    assert!(
        common::wait_until(Duration::from_secs(2), || {
            let o = orchestrator.clone();
            async move { o.stats().await.running == 1 }
        })
        .await
    );

    let o = orchestrator.clone();
    let waiting = tokio::spawn(async move { o.get("/api/widgets?page=2").await });
    assert!(
        common::wait_until(Duration::from_secs(2), || {
            let o = orchestrator.clone();
            async move { o.stats().await.queued == 1 }
        })
        .await
    );

    assert_eq!(orchestrator.cancel("/api/widgets"), 1);
    assert!(matches!(
        waiting.await.unwrap(),
        Err(FetchError::Cancelled)
    ));

    // The running request is untouched.
    let done = running.await.unwrap().unwrap();
    assert_eq!(done["done"], true);
    slow.assert_hits(1);
    queued.assert_hits(0);

    // Cancellation is not a failure: the next call goes through.
    orchestrator.get("/api/widgets?page=2").await.unwrap();
    queued.assert_hits(1);
}

#[tokio::test]
async fn pacing_spaces_out_request_starts() {
    let server = common::setup_server();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/tick");
        then.status(200).json_body(json!({}));
    });
    let orchestrator = common::builder_for(&server)
        .min_interval(Duration::from_millis(150))
        .cache_ttl(Duration::ZERO)
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let (a, b, c) = tokio::join!(
        orchestrator.get("/api/tick?n=1"),
        orchestrator.get("/api/tick?n=2"),
        orchestrator.get("/api/tick?n=3"),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    mock.assert_hits(3);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

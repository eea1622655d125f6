//! Integration tests for the retrying request executor
//!
//! Runs the executor against a local mock server. Backoff sleeps go through
//! a `ManualClock` so the delays can be asserted without waiting on them,
//! except in the cancellation tests, which need a real sleep to interrupt.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use carfx::client::{ApiRequest, ClassifiedError, RequestExecutor, RetryPolicy};
use carfx::clock::ManualClock;

#[derive(Debug, Deserialize, PartialEq)]
struct Rate {
    rate: f64,
}

/// Helper to build an executor whose backoff is recorded, not slept
fn create_executor(base_url: &str) -> (RequestExecutor, ManualClock) {
    let clock = ManualClock::new();
    let executor = RequestExecutor::new(base_url).with_clock(Arc::new(clock.clone()));
    (executor, clock)
}

fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_retries,
        Duration::from_millis(1000),
        Duration::from_millis(10_000),
    )
    .unwrap()
}

fn rate_request() -> ApiRequest {
    ApiRequest::get("/currency/rate")
        .query("from", "USD")
        .query("to", "EUR")
}

#[tokio::test]
async fn test_two_server_errors_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rate": 0.92 })))
        .mount(&server)
        .await;

    let (executor, clock) = create_executor(&server.uri());
    let rate: Rate = executor
        .execute(&rate_request(), &policy(2))
        .await
        .expect("third attempt should succeed");

    assert_eq!(rate.rate, 0.92);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);

    let sleeps = clock.sleeps();
    assert_eq!(sleeps.len(), 2);
    assert!(
        sleeps[0] >= Duration::from_millis(1000) && sleeps[0] < Duration::from_millis(1100),
        "first delay out of range: {:?}",
        sleeps[0]
    );
    assert!(
        sleeps[1] >= Duration::from_millis(2000) && sleeps[1] < Duration::from_millis(2200),
        "second delay out of range: {:?}",
        sleeps[1]
    );
}

#[tokio::test]
async fn test_not_found_fails_after_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "error": "no such pair" })))
        .expect(1)
        .mount(&server)
        .await;

    let (executor, clock) = create_executor(&server.uri());
    let err = executor
        .execute::<Rate>(&rate_request(), &policy(3))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ClassifiedError::ClientError {
            status: 404,
            message: "no such pair".to_string()
        }
    );
    assert!(clock.sleeps().is_empty(), "client errors are not retried");
}

#[tokio::test]
async fn test_attempts_never_exceed_max_retries_plus_one() {
    for max_retries in 0..=3u32 {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (executor, clock) = create_executor(&server.uri());
        let err = executor
            .execute::<Rate>(&rate_request(), &policy(max_retries))
            .await
            .unwrap_err();

        assert!(matches!(err, ClassifiedError::ServerError { status: 500, .. }));
        assert_eq!(
            server.received_requests().await.unwrap().len() as u32,
            max_retries + 1
        );
        assert_eq!(clock.sleeps().len() as u32, max_retries);
    }
}

#[tokio::test]
async fn test_backoff_delays_are_capped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let (executor, clock) = create_executor(&server.uri());
    let capped = RetryPolicy::new(5, Duration::from_millis(1000), Duration::from_millis(3000)).unwrap();
    let _ = executor.execute::<Rate>(&rate_request(), &capped).await;

    let sleeps = clock.sleeps();
    assert_eq!(sleeps.len(), 5);
    for delay in &sleeps[2..] {
        assert_eq!(*delay, Duration::from_millis(3000));
    }
}

#[tokio::test]
async fn test_malformed_success_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unexpected": true })))
        .expect(1)
        .mount(&server)
        .await;

    let (executor, clock) = create_executor(&server.uri());
    let err = executor
        .execute::<Rate>(&rate_request(), &policy(3))
        .await
        .unwrap_err();

    assert!(matches!(err, ClassifiedError::MalformedResponse { .. }));
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_slow_response_times_out_and_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "rate": 1.0 }))
                .set_delay(Duration::from_secs(2)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rate": 1.1 })))
        .mount(&server)
        .await;

    let (executor, clock) = create_executor(&server.uri());
    let executor = executor.with_timeout(Duration::from_millis(100));

    let rate: Rate = executor
        .execute(&rate_request(), &policy(1))
        .await
        .expect("retry after timeout should succeed");

    assert_eq!(rate.rate, 1.1);
    assert_eq!(clock.sleeps().len(), 1);
}

#[tokio::test]
async fn test_timeout_is_reported_when_retries_run_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let (executor, _clock) = create_executor(&server.uri());
    let err = executor
        .with_timeout(Duration::from_millis(100))
        .execute::<Rate>(&rate_request(), &RetryPolicy::no_retries())
        .await
        .unwrap_err();

    match err {
        ClassifiedError::Timeout { timeout, .. } => {
            assert_eq!(timeout, Duration::from_millis(100))
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_refused_is_retried() {
    // Reserve a port, then free it so nothing is listening
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (executor, clock) = create_executor(&format!("http://{}", addr));
    let err = executor
        .execute::<Rate>(&rate_request(), &policy(2))
        .await
        .unwrap_err();

    assert!(matches!(err, ClassifiedError::ConnectionFailure { .. }));
    assert_eq!(clock.sleeps().len(), 2);
}

#[tokio::test]
async fn test_cancel_during_backoff_returns_promptly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    // Real clock: the 10s backoff must be interrupted, not waited out
    let executor = RequestExecutor::new(server.uri());
    let slow = RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(30)).unwrap();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute_with_cancel::<Rate>(&rate_request(), &slow, &cancel),
    )
    .await
    .expect("cancellation should end the call well before the backoff elapses");

    assert_eq!(result.unwrap_err(), ClassifiedError::Cancelled);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let executor = RequestExecutor::new(server.uri()).with_timeout(Duration::from_secs(30));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute_with_cancel::<Rate>(&rate_request(), &policy(3), &cancel),
    )
    .await
    .expect("cancellation should abort the pending request");

    let err = result.unwrap_err();
    assert_eq!(err, ClassifiedError::Cancelled);
    assert!(!matches!(err, ClassifiedError::Timeout { .. }));
}

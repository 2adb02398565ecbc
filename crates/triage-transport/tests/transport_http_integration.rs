use std::time::{Duration, Instant};

use httpmock::prelude::*;
use serde_json::{json, Value};
use triage_core::{current_unix_timestamp, current_unix_timestamp_ms};
use triage_transport::{
    CallDescriptor, CancelSignal, RateLimitState, ResilientTransport, RetryConfig, TransportError,
    RETRY_ATTEMPT_HEADER,
};

fn test_config() -> RetryConfig {
    RetryConfig {
        max_attempts: 4,
        base_delay_ms: 1,
        max_delay_ms: 5,
        jitter: false,
        default_rate_limit_wait_ms: 10,
        max_rate_limit_wait_ms: 5_000,
        max_rate_limit_waits: 3,
        low_quota_buffer: 0,
    }
}

fn transport(config: RetryConfig) -> ResilientTransport {
    ResilientTransport::new(reqwest::Client::new(), config, RateLimitState::shared())
}

#[tokio::test]
async fn integration_three_transient_failures_then_success_sleeps_exactly_three_times() {
    let server = MockServer::start();
    let failures = (0..3)
        .map(|attempt| {
            server.mock(|when, then| {
                when.method(GET)
                    .path("/sessions/devin-1")
                    .header(RETRY_ATTEMPT_HEADER, attempt.to_string());
                then.status(503).body("upstream busy");
            })
        })
        .collect::<Vec<_>>();
    let success = server.mock(|when, then| {
        when.method(GET)
            .path("/sessions/devin-1")
            .header(RETRY_ATTEMPT_HEADER, "3");
        then.status(200).json_body(json!({"session_id": "devin-1"}));
    });

    let transport = transport(test_config());
    let body: Value = transport
        .call_json(
            &CallDescriptor::get("get session", server.url("/sessions/devin-1")),
            &CancelSignal::never(),
        )
        .await
        .expect("call should eventually succeed");

    assert_eq!(body["session_id"], "devin-1");
    for mock in &failures {
        mock.assert_calls(1);
    }
    success.assert_calls(1);
    let metrics = transport.metrics();
    assert_eq!(metrics.attempts, 4);
    assert_eq!(metrics.backoff_sleeps, 3);
    assert_eq!(metrics.rate_limit_waits, 0);
}

#[tokio::test]
async fn integration_invalid_status_fails_immediately_without_retry() {
    let server = MockServer::start();
    let missing = server.mock(|when, then| {
        when.method(GET).path("/repos/owner/repo/issues/404");
        then.status(404).body("{\"message\":\"Not Found\"}");
    });

    let transport = transport(test_config());
    let error = transport
        .call(
            &CallDescriptor::get("get issue", server.url("/repos/owner/repo/issues/404")),
            &CancelSignal::never(),
        )
        .await
        .expect_err("404 must not be retried");

    missing.assert_calls(1);
    assert!(error.is_invalid());
    assert_eq!(error.status(), Some(404));
    assert_eq!(transport.metrics().backoff_sleeps, 0);
}

#[tokio::test]
async fn integration_exhausted_transient_retries_surface_unavailable() {
    let server = MockServer::start();
    let failing = server.mock(|when, then| {
        when.method(GET).path("/flaky");
        then.status(502).body("bad gateway");
    });

    let transport = transport(test_config());
    let error = transport
        .call(
            &CallDescriptor::get("flaky call", server.url("/flaky")),
            &CancelSignal::never(),
        )
        .await
        .expect_err("retries should be exhausted");

    failing.assert_calls(4);
    match error {
        TransportError::Unavailable {
            attempts, reason, ..
        } => {
            assert_eq!(attempts, 4);
            assert!(reason.contains("502"), "{reason}");
        }
        other => panic!("expected unavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn integration_rate_limited_response_waits_at_least_reported_reset() {
    let server = MockServer::start();
    let limited = server.mock(|when, then| {
        when.method(POST)
            .path("/sessions")
            .header(RETRY_ATTEMPT_HEADER, "0");
        then.status(429)
            .header("retry-after", "1")
            .body("slow down");
    });
    let accepted = server.mock(|when, then| {
        when.method(POST)
            .path("/sessions")
            .header(RETRY_ATTEMPT_HEADER, "1");
        then.status(200).json_body(json!({"session_id": "devin-2"}));
    });

    let transport = transport(test_config());
    let started = Instant::now();
    let body: Value = transport
        .call_json(
            &CallDescriptor::post("create session", server.url("/sessions"), json!({"prompt": "x"})),
            &CancelSignal::never(),
        )
        .await
        .expect("call should succeed after the reset");

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(body["session_id"], "devin-2");
    limited.assert_calls(1);
    accepted.assert_calls(1);
    let metrics = transport.metrics();
    assert_eq!(metrics.rate_limit_waits, 1);
    assert_eq!(metrics.backoff_sleeps, 0);
}

#[tokio::test]
async fn regression_429_without_reset_signal_is_treated_as_transient() {
    let server = MockServer::start();
    let limited = server.mock(|when, then| {
        when.method(GET)
            .path("/limited")
            .header(RETRY_ATTEMPT_HEADER, "0");
        then.status(429).body("too many requests");
    });
    let accepted = server.mock(|when, then| {
        when.method(GET)
            .path("/limited")
            .header(RETRY_ATTEMPT_HEADER, "1");
        then.status(200).json_body(json!([]));
    });

    let transport = transport(test_config());
    let body: Value = transport
        .call_json(
            &CallDescriptor::get("limited call", server.url("/limited")),
            &CancelSignal::never(),
        )
        .await
        .expect("call should succeed");

    assert_eq!(body, json!([]));
    limited.assert_calls(1);
    accepted.assert_calls(1);
    assert_eq!(transport.metrics().backoff_sleeps, 1);
    assert_eq!(transport.metrics().rate_limit_waits, 0);
}

#[tokio::test]
async fn integration_exhausted_quota_is_respected_by_other_transports_sharing_state() {
    let server = MockServer::start();
    let reset_unix = current_unix_timestamp() + 3;
    let reset = reset_unix.to_string();
    let first = server.mock(|when, then| {
        when.method(GET).path("/first");
        then.status(200)
            .header("x-ratelimit-remaining", "0")
            .header("x-ratelimit-reset", reset.as_str())
            .json_body(json!({"ok": true}));
    });
    let second = server.mock(|when, then| {
        when.method(GET).path("/second");
        then.status(200)
            .header("x-ratelimit-remaining", "4999")
            .json_body(json!({"ok": true}));
    });

    let shared = RateLimitState::shared();
    let a = ResilientTransport::new(reqwest::Client::new(), test_config(), shared.clone());
    let b = ResilientTransport::new(reqwest::Client::new(), test_config(), shared.clone());

    let _: Value = a
        .call_json(
            &CallDescriptor::get("first", server.url("/first")),
            &CancelSignal::never(),
        )
        .await
        .expect("first call");
    assert_eq!(shared.remaining(), Some(0));

    let started = Instant::now();
    let _: Value = b
        .call_json(
            &CallDescriptor::get("second", server.url("/second")),
            &CancelSignal::never(),
        )
        .await
        .expect("second call");
    let elapsed = started.elapsed();

    first.assert_calls(1);
    second.assert_calls(1);
    assert_eq!(shared.remaining(), Some(4999));
    assert_eq!(a.metrics().rate_limit_waits, 0);
    assert_eq!(b.metrics().rate_limit_waits, 1);
    assert!(
        elapsed >= Duration::from_secs(1),
        "second transport returned after {elapsed:?} without waiting for the reset"
    );
    assert!(current_unix_timestamp_ms() >= reset_unix * 1_000);
}

#[tokio::test]
async fn functional_cancelled_signal_prevents_any_request() {
    let server = MockServer::start();
    let never_called = server.mock(|when, then| {
        when.method(GET).path("/never");
        then.status(200).json_body(json!({}));
    });
    let (tx, cancel) = CancelSignal::channel();
    tx.send(true).expect("cancel");

    let error = transport(test_config())
        .call(&CallDescriptor::get("never", server.url("/never")), &cancel)
        .await
        .expect_err("cancelled before the first attempt");

    assert!(error.is_cancelled());
    never_called.assert_calls(0);
}

#[tokio::test]
async fn functional_cancellation_interrupts_backoff_sleep() {
    let server = MockServer::start();
    let failing = server.mock(|when, then| {
        when.method(GET).path("/down");
        then.status(500).body("down");
    });
    let config = RetryConfig {
        base_delay_ms: 60_000,
        max_delay_ms: 60_000,
        ..test_config()
    };
    let (tx, cancel) = CancelSignal::channel();
    let transport = transport(config);
    let url = server.url("/down");
    let handle = tokio::spawn(async move {
        transport
            .call(&CallDescriptor::get("down", url), &cancel)
            .await
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(true).expect("cancel");

    let error = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("call should stop promptly")
        .expect("join")
        .expect_err("cancelled during backoff");
    assert!(error.is_cancelled());
    failing.assert_calls(1);
}

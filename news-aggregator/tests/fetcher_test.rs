mod common;

use common::*;
use news_aggregator::{AggregatorError, AttemptOutcome, FetchErrorKind, Fetcher, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

const URL: &str = "https://feeds.example.com/feed.xml";

#[tokio::test(start_paused = true)]
async fn test_always_transient_source_is_attempted_max_attempts_times() {
    init_tracing();

    let transport = Arc::new(ScriptedTransport::new().route(URL, vec![status(503)]));
    let fetcher = fetcher(&transport);

    let outcome = fetcher.fetch("feed", URL, None).await;

    assert_eq!(transport.calls(), 3);
    assert_eq!(outcome.attempts.len(), 3);
    assert!(outcome
        .attempts
        .iter()
        .all(|a| a.outcome == AttemptOutcome::TransientFailure && a.http_status == Some(503)));
    assert_eq!(
        outcome.attempts.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let delays: Vec<Duration> = outcome.attempts.iter().filter_map(|a| a.backoff).collect();
    assert_eq!(delays.len(), 2);
    assert_eq!(delays[0], Duration::from_millis(500));
    assert!(delays.windows(2).all(|w| w[0] <= w[1]), "delays {:?}", delays);
    assert!(outcome.attempts[2].backoff.is_none());

    match outcome.result {
        Err(AggregatorError::Transport { kind, .. }) => assert_eq!(kind, FetchErrorKind::HttpStatus),
        other => panic!("expected transport error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_permanent_status_is_attempted_once() {
    init_tracing();

    let transport = Arc::new(ScriptedTransport::new().route(URL, vec![status(404)]));
    let outcome = fetcher(&transport).fetch("feed", URL, None).await;

    assert_eq!(transport.calls(), 1);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::PermanentFailure);
    assert!(matches!(
        outcome.result,
        Err(AggregatorError::HttpStatus { status: 404, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_transport_error_is_attempted_once() {
    init_tracing();

    let transport = Arc::new(ScriptedTransport::new().route(URL, vec![fail(FetchErrorKind::Body)]));
    let outcome = fetcher(&transport).fetch("feed", URL, None).await;

    assert_eq!(transport.calls(), 1);
    assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::PermanentFailure);
    assert_eq!(outcome.attempts[0].error_kind, Some(FetchErrorKind::Body));
    assert!(outcome.result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success() {
    init_tracing();

    let transport = Arc::new(ScriptedTransport::new().route(
        URL,
        vec![
            fail(FetchErrorKind::Reset),
            status(429),
            xml(rss_feed(&[("BTC rallies", "https://a.example.com/1")])),
        ],
    ));
    let outcome = fetcher(&transport).fetch("feed", URL, None).await;

    assert_eq!(transport.calls(), 3);
    let outcomes: Vec<AttemptOutcome> = outcome.attempts.iter().map(|a| a.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            AttemptOutcome::TransientFailure,
            AttemptOutcome::TransientFailure,
            AttemptOutcome::Success
        ]
    );
    let payload = outcome.result.expect("third attempt should succeed");
    assert_eq!(payload.status, 200);
    assert_eq!(payload.encoding, encoding_rs::UTF_8);
    assert!(payload.text.contains("BTC rallies"));
    info!("Fetched {} bytes after retries", payload.bytes.len());
}

#[tokio::test(start_paused = true)]
async fn test_custom_policy_bounds_attempts_and_caps_delay() {
    init_tracing();

    let policy = RetryPolicy {
        max_attempts: 5,
        backoff_base_ms: 100,
        backoff_multiplier: 3.0,
        backoff_max_ms: 1_000,
        ..Default::default()
    };
    let transport = Arc::new(ScriptedTransport::new().route(URL, vec![fail(FetchErrorKind::Timeout)]));
    let fetcher = Fetcher::with_transport(transport.clone(), policy);

    let outcome = fetcher.fetch("feed", URL, None).await;

    assert_eq!(transport.calls(), 5);
    let delays: Vec<Duration> = outcome.attempts.iter().filter_map(|a| a.backoff).collect();
    assert_eq!(delays.len(), 4);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]), "delays {:?}", delays);
    assert!(delays.iter().all(|d| *d <= Duration::from_millis(1_000)));
    assert_eq!(delays[3], Duration::from_millis(1_000));
}

#[tokio::test(start_paused = true)]
async fn test_retry_past_deadline_is_not_started() {
    init_tracing();

    let transport = Arc::new(ScriptedTransport::new().route(URL, vec![status(502)]));
    let deadline = Instant::now() + Duration::from_secs(1);

    // 500ms fits before the deadline, the following 1s backoff does not.
    let outcome = fetcher(&transport).fetch("feed", URL, Some(deadline)).await;

    assert_eq!(transport.calls(), 2);
    match outcome.result {
        Err(AggregatorError::Transport { kind, .. }) => {
            assert_eq!(kind, FetchErrorKind::DeadlineExceeded)
        }
        other => panic!("expected deadline error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_oversized_backoff_against_deadline_fails_fast() {
    init_tracing();

    // Not validated: a policy built in code can carry any delay.
    let policy = RetryPolicy {
        backoff_base_ms: u64::MAX,
        backoff_max_ms: u64::MAX,
        ..Default::default()
    };
    let transport = Arc::new(ScriptedTransport::new().route(URL, vec![status(503)]));
    let fetcher = Fetcher::with_transport(transport.clone(), policy);
    let started = Instant::now();

    let outcome = fetcher
        .fetch("feed", URL, Some(started + Duration::from_secs(30)))
        .await;

    assert_eq!(transport.calls(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(matches!(
        outcome.result,
        Err(AggregatorError::Transport {
            kind: FetchErrorKind::DeadlineExceeded,
            ..
        })
    ));
}

#[tokio::test]
async fn test_undeclared_gb18030_payload_is_decoded_without_loss() {
    init_tracing();

    let page = headline_page(&[("沪铜期货震荡上行", "/2024-05-01/1.html", "2024-05-01 09:30")]);
    let transport = Arc::new(
        ScriptedTransport::new().route(URL, vec![raw(Some("text/html"), gb18030(&page))]),
    );
    let payload = fetcher(&transport)
        .fetch("hexun", URL, None)
        .await
        .result
        .expect("fetch should succeed");

    assert_eq!(payload.encoding, encoding_rs::GB18030);
    assert_eq!(payload.text, page);
    assert!(!payload.text.contains('\u{FFFD}'));
}

#[tokio::test]
async fn test_declared_legacy_charset_is_decoded_as_gb18030() {
    init_tracing();

    let text = "<html><head><meta charset=\"gb2312\"></head><body>螺纹钢</body></html>";
    let transport = Arc::new(ScriptedTransport::new().route(
        URL,
        vec![raw(Some("text/html; charset=GB2312"), gb18030(text))],
    ));
    let payload = fetcher(&transport)
        .fetch("hexun", URL, None)
        .await
        .result
        .expect("fetch should succeed");

    assert_eq!(payload.encoding, encoding_rs::GB18030);
    assert!(payload.text.contains("螺纹钢"));
}

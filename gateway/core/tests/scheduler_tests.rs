//! Integration tests for the rate-limited inference scheduler
//!
//! Time inside the admission window is driven by a `ManualClock`; only the
//! dispatcher's short poll interval and queue timeouts use real time.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use common::{wait_for, MockLlm};
use gateway_core::{
    FallbackReason, LlmRequest, ManualClock, RateLimitedScheduler, SchedulerConfig,
    SchedulerError, StreamingToken,
};

const WAIT: Duration = Duration::from_secs(2);

fn config(rpm: u32, queue: usize) -> SchedulerConfig {
    SchedulerConfig::default()
        .with_max_requests_per_minute(rpm)
        .with_max_queue_size(queue)
        .with_queue_timeout(Duration::from_secs(5))
        .with_dispatch_poll_interval(Duration::from_millis(10))
}

struct Harness {
    scheduler: RateLimitedScheduler,
    primary: Arc<MockLlm>,
    fallback: Arc<MockLlm>,
    clock: Arc<ManualClock>,
}

fn harness(config: SchedulerConfig) -> Harness {
    let primary = MockLlm::new("primary");
    let fallback = MockLlm::new("fallback");
    let clock = ManualClock::shared();
    let scheduler =
        RateLimitedScheduler::with_clock(primary.clone(), fallback.clone(), config, clock.clone());
    scheduler.start().unwrap();

    Harness {
        scheduler,
        primary,
        fallback,
        clock,
    }
}

// =============================================================================
// Rate limiting and queueing
// =============================================================================

#[tokio::test]
async fn test_third_request_waits_for_a_free_slot() {
    let h = harness(config(2, 10));

    let mut tasks = JoinSet::new();
    for i in 0..3 {
        let scheduler = h.scheduler.clone();
        tasks.spawn(async move { scheduler.generate(LlmRequest::new(format!("req {i}"))).await });
    }

    assert!(wait_for(WAIT, || h.scheduler.status().queue_size == 1).await);
    assert_eq!(h.primary.calls(), 2);
    assert_eq!(h.scheduler.status().capacity_remaining, 0);

    // Window rolls over; the dispatcher hands the waiting request a slot
    h.clock.advance(Duration::from_secs(61));

    let mut served = 0;
    while let Some(result) = tasks.join_next().await {
        let outcome = result.unwrap().unwrap();
        assert!(!outcome.used_fallback, "no request should be dropped to fallback");
        served += 1;
    }

    assert_eq!(served, 3);
    assert_eq!(h.primary.calls(), 3);
    assert_eq!(h.fallback.calls(), 0);
    assert_eq!(h.scheduler.status().queue_size, 0);
    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_direct_admissions_never_exceed_limit() {
    let h = harness(config(5, 0));

    let mut tasks = JoinSet::new();
    for i in 0..20 {
        let scheduler = h.scheduler.clone();
        tasks.spawn(async move { scheduler.generate(LlmRequest::new(format!("burst {i}"))).await });
    }

    let mut via_fallback = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap().unwrap().used_fallback {
            via_fallback += 1;
        }
    }

    assert_eq!(h.primary.calls(), 5);
    assert_eq!(via_fallback, 15);
    assert_eq!(h.scheduler.status().requests_last_minute, 5);
    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_zero_queue_sends_overflow_to_fallback_immediately() {
    let h = harness(config(1, 0));

    assert!(!h.scheduler.generate(LlmRequest::new("first")).await.unwrap().used_fallback);

    let started = Instant::now();
    for i in 0..3 {
        let outcome = h
            .scheduler
            .generate(LlmRequest::new(format!("overflow {i}")))
            .await
            .unwrap();
        assert!(outcome.used_fallback);
        assert_eq!(outcome.fallback_reason, Some(FallbackReason::QueueFull));
    }

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(h.fallback.calls(), 3);
    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_full_queue_routes_to_fallback_without_waiting() {
    let h = harness(config(1, 1));

    h.scheduler.generate(LlmRequest::new("direct")).await.unwrap();

    let scheduler = h.scheduler.clone();
    let waiting = tokio::spawn(async move { scheduler.generate(LlmRequest::new("queued")).await });
    assert!(wait_for(WAIT, || h.scheduler.status().queue_size == 1).await);

    let started = Instant::now();
    let overflow = h.scheduler.generate(LlmRequest::new("overflow")).await.unwrap();
    assert!(overflow.used_fallback);
    assert_eq!(overflow.fallback_reason, Some(FallbackReason::QueueFull));
    assert!(started.elapsed() < Duration::from_millis(500));

    h.scheduler.stop().await.unwrap();
    let stopped = waiting.await.unwrap().unwrap();
    assert_eq!(stopped.fallback_reason, Some(FallbackReason::SchedulerStopped));
}

#[tokio::test]
async fn test_queue_timeout_falls_back_exactly_once() {
    let h = harness(config(1, 4).with_queue_timeout(Duration::from_millis(100)));

    h.scheduler.generate(LlmRequest::new("direct")).await.unwrap();

    let outcome = h.scheduler.generate(LlmRequest::new("slow lane")).await.unwrap();
    assert!(outcome.used_fallback);
    assert_eq!(outcome.fallback_reason, Some(FallbackReason::QueueTimeout));
    assert_eq!(h.scheduler.status().queue_size, 0);

    // A slot freeing later must not dispatch the withdrawn request
    h.clock.advance(Duration::from_secs(61));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.primary.prompts(), vec!["direct".to_string()]);
    assert_eq!(h.fallback.prompts(), vec!["slow lane".to_string()]);
    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_queued_requests_dispatch_in_arrival_order() {
    let h = harness(config(1, 10));
    h.scheduler.generate(LlmRequest::new("first")).await.unwrap();

    let mut tasks = JoinSet::new();
    for i in 0..5 {
        let scheduler = h.scheduler.clone();
        tasks.spawn(async move { scheduler.generate(LlmRequest::new(format!("q{i}"))).await });
        assert!(wait_for(WAIT, || h.scheduler.status().queue_size == i + 1).await);
    }

    for dispatched in 1..=5 {
        h.clock.advance(Duration::from_secs(61));
        assert!(wait_for(WAIT, || h.primary.calls() == dispatched + 1).await);
    }

    while let Some(result) = tasks.join_next().await {
        assert!(!result.unwrap().unwrap().used_fallback);
    }
    assert_eq!(h.primary.prompts(), vec!["first", "q0", "q1", "q2", "q3", "q4"]);
    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_waiters_dispatch_in_enqueue_order() {
    let h = harness(config(1, 16));
    h.scheduler.generate(LlmRequest::new("first")).await.unwrap();

    // All waiters race into the queue at once
    let mut tasks = JoinSet::new();
    for i in 0..8 {
        let scheduler = h.scheduler.clone();
        tasks.spawn(async move { scheduler.generate(LlmRequest::new(format!("c{i}"))).await });
    }
    assert!(wait_for(WAIT, || h.scheduler.status().queue_size == 8).await);
    let enqueue_order = h.scheduler.pending_prompts();
    assert_eq!(enqueue_order.len(), 8);

    for dispatched in 1..=8 {
        h.clock.advance(Duration::from_secs(61));
        assert!(wait_for(WAIT, || h.primary.calls() == dispatched + 1).await);
    }

    while let Some(result) = tasks.join_next().await {
        assert!(!result.unwrap().unwrap().used_fallback);
    }
    assert_eq!(h.primary.prompts()[1..], enqueue_order[..]);
    h.scheduler.stop().await.unwrap();
}

// =============================================================================
// Fallback routing
// =============================================================================

#[tokio::test]
async fn test_primary_timeout_uses_fallback() {
    let h = harness(config(10, 10).with_primary_timeout(Duration::from_millis(50)));
    h.primary.set_latency(Duration::from_millis(500));

    let started = Instant::now();
    let outcome = h.scheduler.generate(LlmRequest::new("hello")).await.unwrap();

    assert!(outcome.used_fallback);
    assert_eq!(outcome.fallback_reason, Some(FallbackReason::PrimaryFailed));
    assert_eq!(outcome.response.content, "[fallback] hello");
    assert!(started.elapsed() < Duration::from_millis(400));
    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_dispatched_request_falls_back_when_primary_fails() {
    let h = harness(config(1, 4));
    h.scheduler.generate(LlmRequest::new("direct")).await.unwrap();

    let scheduler = h.scheduler.clone();
    let waiting = tokio::spawn(async move { scheduler.generate(LlmRequest::new("later")).await });
    assert!(wait_for(WAIT, || h.scheduler.status().queue_size == 1).await);

    h.primary.set_failing(true);
    h.clock.advance(Duration::from_secs(61));

    let outcome = waiting.await.unwrap().unwrap();
    assert!(outcome.used_fallback);
    assert_eq!(outcome.fallback_reason, Some(FallbackReason::PrimaryFailed));
    assert_eq!(h.primary.calls(), 2);
    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_resolves_every_waiter() {
    let h = harness(config(1, 10));
    h.scheduler.generate(LlmRequest::new("direct")).await.unwrap();

    let mut tasks = JoinSet::new();
    for i in 0..4 {
        let scheduler = h.scheduler.clone();
        tasks.spawn(async move { scheduler.generate(LlmRequest::new(format!("w{i}"))).await });
    }
    assert!(wait_for(WAIT, || h.scheduler.status().queue_size == 4).await);

    h.scheduler.stop().await.unwrap();

    let mut stopped = 0;
    while let Some(result) = tasks.join_next().await {
        let outcome = result.unwrap().unwrap();
        assert_eq!(outcome.fallback_reason, Some(FallbackReason::SchedulerStopped));
        stopped += 1;
    }
    assert_eq!(stopped, 4);
    assert_eq!(h.fallback.calls(), 4);
    assert!(matches!(
        h.scheduler.generate(LlmRequest::new("late")).await,
        Err(SchedulerError::NotRunning)
    ));
}

// =============================================================================
// Streaming
// =============================================================================

#[tokio::test]
async fn test_stream_from_primary_then_fallback() {
    let h = harness(config(1, 10));

    let mut primary = h
        .scheduler
        .generate_stream(LlmRequest::new("explain lifetimes"))
        .await
        .unwrap();
    assert!(!primary.used_fallback);

    let mut tokens = Vec::new();
    while let Some(token) = primary.receiver.recv().await {
        tokens.push(token);
    }
    assert_eq!(tokens.len(), 3);
    assert!(matches!(tokens.last(), Some(StreamingToken::Complete { .. })));

    let fallback = h
        .scheduler
        .generate_stream(LlmRequest::new("and borrowing"))
        .await
        .unwrap();
    assert!(fallback.used_fallback);
    assert_eq!(fallback.fallback_reason, Some(FallbackReason::RateLimited));
    assert_eq!(h.scheduler.status().queue_size, 0);
    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_stream_falls_back_when_primary_cannot_start() {
    let h = harness(config(10, 10));
    h.primary.set_failing(true);

    let mut stream = h.scheduler.generate_stream(LlmRequest::new("hi")).await.unwrap();
    assert!(stream.used_fallback);
    assert_eq!(stream.fallback_reason, Some(FallbackReason::PrimaryFailed));
    assert_eq!(
        stream.receiver.recv().await,
        Some(StreamingToken::Token("hi ".to_string()))
    );
    h.scheduler.stop().await.unwrap();
}

// =============================================================================
// Status
// =============================================================================

#[tokio::test]
async fn test_status_is_stable_without_requests() {
    let h = harness(config(4, 10));
    h.scheduler.generate(LlmRequest::new("one")).await.unwrap();

    let first = h.scheduler.status();
    for _ in 0..5 {
        assert_eq!(h.scheduler.status(), first);
    }

    assert_eq!(first.requests_last_minute, 1);
    assert_eq!(first.capacity_remaining, 3);
    assert!((first.utilization - 0.25).abs() < f64::EPSILON);
    assert!(first.running);
    h.scheduler.stop().await.unwrap();
}

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use narrator_engine::{LimiterSettings, ScheduleError, SlidingWindowLimiter};
use tokio_util::sync::CancellationToken;

fn settings(requests: usize, tokens: u32, window_ms: u64) -> LimiterSettings {
    LimiterSettings {
        max_requests_per_window: requests,
        max_tokens_per_window: tokens,
        window: Duration::from_millis(window_ms),
        min_backoff: Duration::from_millis(25),
    }
}

#[tokio::test]
async fn request_cap_delays_third_task_a_full_window() {
    let limiter = SlidingWindowLimiter::new(settings(2, 100, 1000));
    let cancel = CancellationToken::new();
    let started = Instant::now();

    for _ in 0..2 {
        limiter.schedule(10, &cancel, || async {}).await.unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(300));

    limiter.schedule(10, &cancel, || async {}).await.unwrap();
    assert!(
        started.elapsed() >= Duration::from_millis(1000),
        "third admission after {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn token_budget_delays_until_earlier_cost_expires() {
    let limiter = SlidingWindowLimiter::new(settings(10, 100, 600));
    let cancel = CancellationToken::new();
    let started = Instant::now();

    limiter.schedule(60, &cancel, || async {}).await.unwrap();
    limiter.schedule(60, &cancel, || async {}).await.unwrap();

    assert!(
        started.elapsed() >= Duration::from_millis(600),
        "second admission after {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn oversized_cost_fails_immediately() {
    let limiter = SlidingWindowLimiter::new(settings(10, 100, 1000));
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let err = limiter
        .schedule(200, &cancel, || async {})
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ScheduleError::BudgetExceeded {
            cost: 200,
            budget: 100
        }
    );
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn throttle_hook_sees_wait_and_attempt() {
    let calls: Arc<Mutex<Vec<(Duration, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    let limiter = SlidingWindowLimiter::new(settings(1, 100, 200))
        .with_throttle_hook(Arc::new(move |wait, attempt| {
            seen.lock().unwrap().push((wait, attempt));
        }));
    let cancel = CancellationToken::new();

    limiter.schedule(10, &cancel, || async {}).await.unwrap();
    limiter.schedule(10, &cancel, || async {}).await.unwrap();

    let calls = calls.lock().unwrap();
    assert!(!calls.is_empty());
    assert_eq!(calls[0].1, 1);
    assert!(calls[0].0 >= Duration::from_millis(25));
}

#[tokio::test]
async fn cancellation_abandons_a_pending_wait() {
    let limiter = Arc::new(SlidingWindowLimiter::new(settings(1, 100, 60_000)));
    let cancel = CancellationToken::new();
    limiter.schedule(10, &cancel, || async {}).await.unwrap();

    let waiting = {
        let limiter = limiter.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { limiter.schedule(10, &cancel, || async {}).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), waiting)
        .await
        .expect("cancelled schedule must return promptly")
        .unwrap();
    assert_eq!(result.unwrap_err(), ScheduleError::Cancelled);
}

#[tokio::test]
async fn concurrent_tasks_never_exceed_the_request_cap() {
    let window = Duration::from_millis(300);
    let limiter = Arc::new(SlidingWindowLimiter::new(settings(3, 1000, 300)));
    let cancel = CancellationToken::new();

    let mut workers = Vec::new();
    for _ in 0..10 {
        let limiter = limiter.clone();
        let cancel = cancel.clone();
        workers.push(tokio::spawn(async move {
            limiter.schedule(1, &cancel, || async { Instant::now() }).await
        }));
    }

    let mut admissions = Vec::new();
    for worker in workers {
        admissions.push(worker.await.unwrap().unwrap());
    }
    admissions.sort();

    // With 3 admissions per window, the 4th-next admission must sit at least
    // (almost) a full window later. Small slack for timestamp skew between
    // registration and the task body running.
    let slack = Duration::from_millis(50);
    for pair in admissions.windows(4) {
        let span = pair[3].duration_since(pair[0]);
        assert!(
            span + slack >= window,
            "4 admissions within {span:?}, window {window:?}"
        );
    }
}

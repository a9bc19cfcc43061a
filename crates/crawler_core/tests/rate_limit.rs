use std::sync::Arc;
use std::time::Duration;

use crawler_core::SlidingWindowLimiter;

const WINDOW: Duration = Duration::from_millis(60_000);

#[tokio::test(start_paused = true)]
async fn request_past_the_limit_is_denied_within_the_window() {
    let limiter = SlidingWindowLimiter::new();

    for expected_remaining in (0..10).rev() {
        let decision = limiter.check_limit("10.0.0.1", 10, WINDOW);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected_remaining);
        tokio::time::advance(Duration::from_millis(100)).await;
    }

    let denied = limiter.check_limit("10.0.0.1", 10, WINDOW);
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    // First request was recorded 1s ago.
    assert_eq!(denied.retry_after, Some(WINDOW - Duration::from_secs(1)));
}

#[tokio::test(start_paused = true)]
async fn admission_resumes_once_the_earliest_request_leaves_the_window() {
    let limiter = SlidingWindowLimiter::new();
    assert!(limiter.check_limit("client", 2, WINDOW).allowed);
    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(limiter.check_limit("client", 2, WINDOW).allowed);
    assert!(!limiter.check_limit("client", 2, WINDOW).allowed);

    // Exactly one window after the earliest timestamp.
    tokio::time::advance(WINDOW - Duration::from_secs(10)).await;
    let decision = limiter.check_limit("client", 2, WINDOW);
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 0);

    // The second request (t=10s) is still inside the window.
    assert!(!limiter.check_limit("client", 2, WINDOW).allowed);
}

#[tokio::test(start_paused = true)]
async fn denied_checks_are_not_recorded() {
    let limiter = SlidingWindowLimiter::new();
    assert!(limiter.check_limit("client", 1, WINDOW).allowed);

    for _ in 0..5 {
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!limiter.check_limit("client", 1, WINDOW).allowed);
    }

    tokio::time::advance(WINDOW - Duration::from_secs(5)).await;
    assert!(limiter.check_limit("client", 1, WINDOW).allowed);
}

#[test]
fn identifiers_are_limited_independently() {
    let limiter = SlidingWindowLimiter::new();
    assert!(limiter.check_limit("a", 1, WINDOW).allowed);
    assert!(!limiter.check_limit("a", 1, WINDOW).allowed);
    assert!(limiter.check_limit("b", 1, WINDOW).allowed);
    assert_eq!(limiter.tracked_identifiers(), 2);
}

#[test]
fn zero_limit_denies_everything() {
    let limiter = SlidingWindowLimiter::new();
    let decision = limiter.check_limit("a", 0, WINDOW);
    assert!(!decision.allowed);
    assert_eq!(decision.retry_after, None);
}

#[test]
fn concurrent_checks_never_admit_more_than_the_limit() {
    let limiter = Arc::new(SlidingWindowLimiter::new());
    let handles = (0..8)
        .map(|_| {
            let limiter = limiter.clone();
            std::thread::spawn(move || {
                (0..50)
                    .filter(|_| limiter.check_limit("shared", 25, WINDOW).allowed)
                    .count()
            })
        })
        .collect::<Vec<_>>();

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 25);
}

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};

fn fast(timeout_ms: u64) -> Poller {
    Poller::new(Duration::from_millis(1), Duration::from_millis(timeout_ms))
}

#[tokio::test]
async fn test_eventually_retries_until_success() {
    let attempts = &AtomicU32::new(0);

    let value = fast(5_000)
        .eventually(move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(format!("attempt {}", n))
            } else {
                Ok(n)
            }
        })
        .await;

    assert!(matches!(value, Ok(3)));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_eventually_times_out_with_last_error() {
    let result: Result<(), PollError> = fast(20)
        .eventually(|| async { Err::<(), _>("still broken") })
        .await;

    match result {
        Err(PollError::Timeout { last, elapsed }) => {
            assert_eq!(last, "still broken");
            assert!(elapsed >= Duration::from_millis(20));
        }
        Ok(()) => panic!("expected timeout"),
    }
}

#[tokio::test]
async fn test_eventually_runs_once_with_zero_timeout() {
    let attempts = &AtomicU32::new(0);

    let result = fast(0)
        .eventually(move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("no")
        })
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_consistently_fails_on_first_error() {
    let attempts = &AtomicU32::new(0);

    let result = fast(1_000)
        .consistently(Duration::from_secs(10), move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n == 2 {
                Err("flapped")
            } else {
                Ok(())
            }
        })
        .await;

    assert_eq!(result, Err("flapped"));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_eventually_consistently_waits_for_stability() {
    let poller = &fast(5_000);
    let attempts = &AtomicU32::new(0);

    // Flaps for the first few calls, then stays healthy.
    let result = poller
        .eventually(move || {
            poller.consistently(Duration::from_millis(5), move || async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 4 && n % 2 == 1 {
                    Err("flap")
                } else {
                    Ok(())
                }
            })
        })
        .await;

    assert!(result.is_ok());
    assert!(attempts.load(Ordering::SeqCst) > 4);
}

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::task::task_with_timeout_and_exponential_backoff;
use super::task::WorkerPool;
use crate::BackoffPolicy;
use crate::Error;
use crate::SystemError;

fn fast_policy(max_retries: usize) -> BackoffPolicy {
    BackoffPolicy {
        max_retries,
        timeout_ms: 50,
        base_delay_ms: 1,
        max_delay_ms: 4,
    }
}

/// # Case 1: Succeeds after transient failures
///
/// ## Setup
/// 1. Task fails twice, then succeeds
///
/// ## Validation criteria
/// 1. Final result is Ok
/// 2. Exactly three attempts were made
#[tokio::test]
async fn test_backoff_recovers_case1() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let result = task_with_timeout_and_exponential_backoff(
        "recovers",
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Fatal("transient".to_string()))
                } else {
                    Ok(n)
                }
            }
        },
        &fast_policy(5),
    )
    .await;

    assert_eq!(result.unwrap(), 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

/// # Case 2: Gives up after max retries and surfaces the last error
#[tokio::test]
async fn test_backoff_exhaustion_case2() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let result: crate::Result<()> = task_with_timeout_and_exponential_backoff(
        "exhausted",
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Fatal("always".to_string())) }
        },
        &fast_policy(2),
    )
    .await;

    assert!(matches!(result, Err(Error::Fatal(_))));
    // first attempt plus max_retries retries
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

/// # Case 3: Per-attempt timeout counts as a failed attempt
#[tokio::test(start_paused = true)]
async fn test_backoff_timeout_case3() {
    let result: crate::Result<()> = task_with_timeout_and_exponential_backoff(
        "slow",
        || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        },
        &fast_policy(1),
    )
    .await;

    assert!(matches!(
        result,
        Err(Error::System(SystemError::RetryExhausted { retries: 2, .. }))
    ));
}

/// # Case 4: WorkerPool caps concurrency at the worker count
///
/// ## Setup
/// 1. Pool of 2 workers, 6 jobs that each hold a slot briefly
///
/// ## Validation criteria
/// 1. Peak observed concurrency never exceeds 2
/// 2. All jobs complete
#[tokio::test]
async fn test_worker_pool_bounds_concurrency_case4() {
    let pool = WorkerPool::new(2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    for _ in 0..6 {
        let running = running.clone();
        let peak = peak.clone();
        let done_tx = done_tx.clone();
        pool.submit("job", async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            let _ = done_tx.send(());
            Ok(())
        })
        .await;
    }

    for _ in 0..6 {
        done_rx.recv().await.expect("job should report completion");
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

/// # Case 5: Closed pool drops new jobs instead of running them
#[tokio::test]
async fn test_worker_pool_close_case5() {
    let pool = WorkerPool::new(1);
    pool.close();

    let ran = Arc::new(AtomicUsize::new(0));
    let flag = ran.clone();
    pool.submit("late", async move {
        flag.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

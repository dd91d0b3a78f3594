//! Tests for the async executor

use super::*;
use deskline_core::DesklineError;
use futures::FutureExt;
use pretty_assertions::assert_eq;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::sync::oneshot;

// ============================================================================
// Test Helpers
// ============================================================================

/// Occupy the worker until the returned sender fires. Resolves once the
/// blocking task has started.
async fn occupy_worker(executor: &AsyncExecutor) -> oneshot::Sender<()> {
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let (started_tx, started_rx) = oneshot::channel::<()>();
    executor
        .submit(
            async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok(())
            },
            0,
        )
        .await;
    started_rx.await.unwrap();
    release_tx
}

async fn explode() -> Result<()> {
    panic!("ticket row vanished")
}

async fn drain(executor: &AsyncExecutor) {
    executor.stop();
    tokio::time::timeout(Duration::from_secs(10), executor.join())
        .await
        .expect("executor drained");
}

// ============================================================================
// Ordering and execution
// ============================================================================

#[tokio::test]
async fn test_tasks_run_in_submission_order() {
    let executor = AsyncExecutor::new("test");
    let seen = Arc::new(Mutex::new(Vec::new()));

    for i in 0..20 {
        let seen = seen.clone();
        executor
            .submit(
                async move {
                    seen.lock().push(i);
                    Ok(())
                },
                0,
            )
            .await;
    }

    drain(&executor).await;
    assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_failing_and_panicking_tasks_do_not_kill_worker() {
    let executor = AsyncExecutor::new("test");
    let completed = Arc::new(AtomicUsize::new(0));

    executor
        .submit(async { Err(DesklineError::Query("deadlock detected".into())) }, 0)
        .await;
    executor.submit(explode(), 0).await;

    let counter = completed.clone();
    executor
        .submit(
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            0,
        )
        .await;

    drain(&executor).await;
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Backpressure
// ============================================================================

#[tokio::test]
async fn test_third_submit_waits_until_worker_dequeues() {
    let executor = Arc::new(AsyncExecutor::new("test"));
    let release = occupy_worker(&executor).await;

    executor.submit(async { Ok(()) }, 2).await;
    executor.submit(async { Ok(()) }, 2).await;
    assert_eq!(executor.queue_size(), 2);

    let blocked = {
        let executor = executor.clone();
        tokio::spawn(async move {
            executor.submit(async { Ok(()) }, 2).await;
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished(), "third submit should wait for space");
    assert_eq!(executor.queue_size(), 2);

    release.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), blocked)
        .await
        .expect("submit unblocked after dequeue")
        .unwrap();

    drain(&executor).await;
    assert_eq!(executor.queue_size(), 0);
}

#[tokio::test]
async fn test_depth_zero_submitters_never_wait() {
    let executor = Arc::new(AsyncExecutor::new("test"));
    let release = occupy_worker(&executor).await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let submitters: Vec<_> = (0..1000usize)
        .map(|submitter| {
            let executor = executor.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                for seq in 0..3usize {
                    let seen = seen.clone();
                    let task = async move {
                        seen.lock().push((submitter, seq));
                        Ok(())
                    };
                    // Depth 0 must enqueue without ever suspending
                    let token = executor.submit(task, 0).now_or_never();
                    assert!(token.is_some(), "submitter {submitter} had to wait");
                }
            })
        })
        .collect();

    for submitter in submitters {
        submitter.await.unwrap();
    }
    assert_eq!(executor.queue_size(), 3000);

    release.send(()).unwrap();
    drain(&executor).await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 3000);
    let mut next_seq = vec![0usize; 1000];
    for &(submitter, seq) in seen.iter() {
        assert_eq!(seq, next_seq[submitter], "submitter {submitter} ran out of order");
        next_seq[submitter] += 1;
    }
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_before_dequeue_skips_task() {
    let executor = AsyncExecutor::new("test");
    let release = occupy_worker(&executor).await;
    let ran = Arc::new(AtomicBool::new(false));

    let flag = ran.clone();
    let token = executor
        .submit(
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            0,
        )
        .await;
    token.cancel();

    release.send(()).unwrap();
    drain(&executor).await;
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_cancel_during_execution_lets_task_finish() {
    let executor = AsyncExecutor::new("test");
    let finished = Arc::new(AtomicBool::new(false));
    let (started_tx, started_rx) = oneshot::channel::<()>();
    let (proceed_tx, proceed_rx) = oneshot::channel::<()>();

    let flag = finished.clone();
    let token = executor
        .submit(
            async move {
                let _ = started_tx.send(());
                let _ = proceed_rx.await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            0,
        )
        .await;

    started_rx.await.unwrap();
    token.cancel();
    proceed_tx.send(()).unwrap();

    drain(&executor).await;
    assert!(finished.load(Ordering::SeqCst));
}

// ============================================================================
// Stop
// ============================================================================

#[tokio::test]
async fn test_stop_twice_and_join_twice() {
    let executor = AsyncExecutor::new("test");
    executor.stop();
    executor.stop();
    assert!(!executor.is_running());
    drain(&executor).await;
    executor.join().await;
}

#[tokio::test]
async fn test_submit_after_stop_drops_task() {
    let executor = AsyncExecutor::new("test");
    drain(&executor).await;

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let token = executor
        .submit(
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            1,
        )
        .await;

    assert!(!token.is_cancelled());
    assert_eq!(executor.queue_size(), 0);
    tokio::task::yield_now().await;
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stop_wakes_blocked_submitter() {
    let executor = Arc::new(AsyncExecutor::new("test"));
    let release = occupy_worker(&executor).await;
    executor.submit(async { Ok(()) }, 1).await;

    let blocked = {
        let executor = executor.clone();
        tokio::spawn(async move {
            executor.submit(async { Ok(()) }, 1).await;
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished());

    executor.stop();
    tokio::time::timeout(Duration::from_secs(5), blocked)
        .await
        .expect("stop wakes submitters")
        .unwrap();

    release.send(()).unwrap();
    executor.join().await;
    assert_eq!(executor.queue_size(), 0);
}

//! Unit tests for the task pool.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use rstest::{fixture, rstest};
use tokio::sync::oneshot;
use tokio::time::sleep;

#[fixture]
fn small_pool() -> TaskPool {
    TaskPool::new(PoolConfig {
        workers: 2,
        queue_capacity: 8,
        queue_wait: Duration::from_millis(50),
    })
    .unwrap_or_else(|err| panic!("pool should build: {err}"))
}

#[rstest]
fn zero_workers_are_rejected() {
    let err = TaskPool::new(PoolConfig {
        workers: 0,
        ..PoolConfig::default()
    })
    .expect_err("a pool without workers cannot run tasks");
    assert_eq!(err, PoolError::NoWorkers);
}

#[rstest]
#[tokio::test]
async fn fan_out_never_exceeds_worker_count(small_pool: TaskPool) {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut batch = Batch::new();

    for index in 0..6 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        batch
            .submit(&small_pool, format!("task-{index}"), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                index
            })
            .await;
    }

    let completion = batch.await_completion().await;
    assert!(completion.is_clean(), "unexpected failures: {completion:?}");
    assert_eq!(completion.results.len(), 6);
    assert!(peak.load(Ordering::SeqCst) <= 2, "peak exceeded worker count");
}

#[rstest]
#[tokio::test]
async fn panics_are_collected_without_failing_siblings(small_pool: TaskPool) {
    let mut batch = Batch::new();
    batch.submit(&small_pool, "ok", async { 1_u8 }).await;
    batch
        .submit(&small_pool, "boom", async {
            let value: Option<u8> = None;
            value.unwrap_or_else(|| panic!("wedged node"))
        })
        .await;

    let completion = batch.await_completion().await;

    assert_eq!(completion.results.get("ok"), Some(&1));
    assert!(
        matches!(
            completion.exceptions.get("boom"),
            Some(TaskError::Panicked { message, .. }) if message == "wedged node"
        ),
        "unexpected exceptions: {:?}",
        completion.exceptions
    );
}

#[rstest]
#[tokio::test]
async fn full_queue_rejects_after_waiting() {
    let pool = TaskPool::new(PoolConfig {
        workers: 1,
        queue_capacity: 1,
        queue_wait: Duration::from_millis(20),
    })
    .unwrap_or_else(|err| panic!("pool should build: {err}"));
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let blocker = pool
        .submit("blocker", async move {
            let _ = release_rx.await;
        })
        .await
        .unwrap_or_else(|err| panic!("first task should be accepted: {err}"));
    let queued = pool
        .submit("queued", async {})
        .await
        .unwrap_or_else(|err| panic!("second task should queue: {err}"));

    let err = pool
        .submit("overflow", async {})
        .await
        .expect_err("third task should be rejected");
    assert!(
        matches!(err, PoolError::Saturated { ref key, capacity: 2, .. } if key == "overflow"),
        "unexpected error: {err:?}"
    );

    let _ = release_tx.send(());
    let completion = await_completion([blocker, queued]).await;
    assert!(completion.is_clean(), "unexpected failures: {completion:?}");
}

#[rstest]
#[tokio::test]
async fn rejected_submissions_surface_as_exceptions() {
    let pool = TaskPool::new(PoolConfig {
        workers: 1,
        queue_capacity: 0,
        queue_wait: Duration::from_millis(10),
    })
    .unwrap_or_else(|err| panic!("pool should build: {err}"));
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let mut batch = Batch::new();

    batch
        .submit(&pool, "a", async move {
            let _ = release_rx.await;
            "a"
        })
        .await;
    batch.submit(&pool, "b", async { "b" }).await;
    assert_eq!(batch.len(), 2);

    let _ = release_tx.send(());
    let completion = batch.await_completion().await;
    assert_eq!(completion.results.get("a"), Some(&"a"));
    assert!(
        matches!(completion.exceptions.get("b"), Some(TaskError::Rejected(_))),
        "unexpected exceptions: {:?}",
        completion.exceptions
    );
}
